use std::path::PathBuf;

use polars::prelude::*;
use tracing::{error, info};

use crate::helper_functions::{read_csv, require_column};
use crate::models::Dataset;

/// CCLE-style mutation calls keyed by DepMap ID.
pub struct MutationDataset {
    pub path: PathBuf,
    pub depmap_id_col: String,
}

impl Dataset for MutationDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading mutation calls from {}", self.path.display());
        let df = match read_csv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read mutation calls: {}", e);
                return Err(e);
            }
        };
        require_column(&df, &self.depmap_id_col, "mutation")?;
        info!("Mutation calls: {} rows", df.height());
        Ok(df)
    }
}
