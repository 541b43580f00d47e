use std::path::PathBuf;

use polars::prelude::*;
use tracing::{debug, error, info};

use crate::helper_functions::{read_tsv, require_column};
use crate::models::Dataset;

/// Per-compound viability measurements, one row per replicate.
pub struct ScreenDataset {
    pub path: PathBuf,
    pub cell_line_id_col: String,
    pub compound_id_col: String,
    pub value_col: String,
}

impl Dataset for ScreenDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading screen results from {}", self.path.display());
        let df = match read_tsv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read screen table: {}", e);
                return Err(e);
            }
        };

        for name in [&self.cell_line_id_col, &self.compound_id_col, &self.value_col] {
            require_column(&df, name, "screen")?;
        }

        let df = df
            .lazy()
            .select([
                col(self.cell_line_id_col.as_str()),
                col(self.compound_id_col.as_str()),
                col(self.value_col.as_str()).cast(DataType::Float64),
            ])
            .collect()?;

        debug!("Screen table: {} replicate measurements", df.height());
        Ok(df)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn keeps_only_the_measurement_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen.txt");
        fs::write(
            &path,
            "experiment_id\tmaster_ccl_id\tmaster_cpd_id\tcpd_avg_pv\n1\t10\t100\t0.8\n1\t10\t100\t0.82\n",
        )
        .unwrap();

        let ds = ScreenDataset {
            path,
            cell_line_id_col: "master_ccl_id".into(),
            compound_id_col: "master_cpd_id".into(),
            value_col: "cpd_avg_pv".into(),
        };
        let df = ds.load().unwrap();
        assert_eq!(df.width(), 3);
        assert_eq!(df.column("cpd_avg_pv").unwrap().dtype(), &DataType::Float64);
    }
}
