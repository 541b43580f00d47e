use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::helper_functions::{read_csv, require_column};
use crate::models::{Dataset, AFFINITY_COL, CONFIDENCE_COL, DRUG_COL, TARGET_COL};

/// Pre-built kinobead drug–target list.
///
/// The four key columns are renamed to the crate-wide names
/// (`drug`, `target`, `affinity`, `target_classification`); every other
/// column (EC50, pEC50, ...) is carried along untouched.
pub struct TargetListDataset {
    pub path: PathBuf,
    pub drug_col: String,
    pub target_col: String,
    pub affinity_col: String,
    pub confidence_col: String,
}

impl Dataset for TargetListDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading kinobead target list from {}", self.path.display());
        let df = match read_csv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read target list: {}", e);
                return Err(e);
            }
        };

        let keys = [
            (self.drug_col.as_str(), DRUG_COL, DataType::String),
            (self.target_col.as_str(), TARGET_COL, DataType::String),
            (self.affinity_col.as_str(), AFFINITY_COL, DataType::Float64),
            (self.confidence_col.as_str(), CONFIDENCE_COL, DataType::String),
        ];
        for (old, _, _) in &keys {
            require_column(&df, old, "target list")?;
        }

        // Rename and cast in the same pass; extra columns keep their position.
        let exprs: Vec<Expr> = df
            .get_column_names()
            .iter()
            .map(|name| match keys.iter().find(|(old, _, _)| *old == name.as_str()) {
                Some((old, new, dtype)) => col(*old).cast(dtype.clone()).alias(*new),
                None => col(name.as_str()),
            })
            .collect();
        let df = df.lazy().select(exprs).collect()?;

        debug!("Target list: {} drug-target records", df.height());
        Ok(df)
    }
}
