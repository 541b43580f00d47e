use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::helper_functions::{read_delimited, require_column};
use crate::models::Dataset;

/// Identifier → canonical name lookup table.
///
/// Used for the cell-line metadata, the compound metadata and the DepMap
/// sample annotation; only the two key columns are kept.
pub struct AnnotationTable {
    pub label: &'static str,
    pub path: PathBuf,
    pub separator: u8,
    pub id_col: String,
    pub name_col: String,
}

impl Dataset for AnnotationTable {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading {} annotation from {}", self.label, self.path.display());
        let df = match read_delimited(&self.path, self.separator) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read {} annotation: {}", self.label, e);
                return Err(e);
            }
        };

        require_column(&df, &self.id_col, self.label)?;
        require_column(&df, &self.name_col, self.label)?;

        let df = df.select([self.id_col.as_str(), self.name_col.as_str()])?;
        debug!("{} annotation: {} entries", self.label, df.height());
        Ok(df)
    }
}
