//! Persists the aligned affinity / response matrices and their metadata.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::affinity_matrix::AffinityMetadata;
use crate::harmonizer::Harmonization;
use crate::helper_functions::dataframe_to_csv;
use crate::matrix::LabeledMatrix;
use crate::missingness::MissingnessCurve;
use crate::models::{polars_err, DRUG_COL};

pub const BUNDLE_FILE_NAME: &str = "preprocessed_bundle.json";

#[derive(Debug, Serialize)]
struct MatrixBlock {
    columns: Vec<String>,
    /// Row-major, one row per entry of `drugs`; `null` marks a missing value.
    values: Vec<Vec<Option<f64>>>,
}

impl From<&LabeledMatrix> for MatrixBlock {
    fn from(m: &LabeledMatrix) -> Self {
        Self { columns: m.col_labels.clone(), values: m.rows_as_options() }
    }
}

#[derive(Debug, Serialize)]
pub struct MissingnessSummary<'a> {
    pub cutoff: usize,
    pub dropped_cell_lines: &'a [String],
    pub curve: &'a MissingnessCurve,
}

#[derive(Debug, Serialize)]
struct Bundle<'a> {
    drugs: &'a [String],
    affinity: MatrixBlock,
    response: MatrixBlock,
    affinity_metadata: &'a AffinityMetadata,
    harmonization: &'a Harmonization,
    missingness: MissingnessSummary<'a>,
}

/// Everything the serializer persists.
pub struct PipelineOutputs<'a> {
    pub affinity: &'a LabeledMatrix,
    pub response: &'a LabeledMatrix,
    pub affinity_metadata: &'a AffinityMetadata,
    pub harmonization: &'a Harmonization,
    pub missingness: MissingnessSummary<'a>,
}

/// Writes the JSON bundle plus one CSV per matrix into `output_dir`.
///
/// Both matrices must carry the identical drug index in the identical order.
pub fn write_outputs(outputs: PipelineOutputs<'_>, output_dir: &Path) -> PolarsResult<PathBuf> {
    if outputs.affinity.row_labels != outputs.response.row_labels {
        return Err(PolarsError::ComputeError(
            format!(
                "affinity and response matrices are not aligned ({} vs {} drugs)",
                outputs.affinity.nrows(),
                outputs.response.nrows()
            )
            .into(),
        ));
    }

    create_dir_all(output_dir).map_err(|e| polars_err(Box::new(e)))?;

    let bundle = Bundle {
        drugs: &outputs.affinity.row_labels,
        affinity: outputs.affinity.into(),
        response: outputs.response.into(),
        affinity_metadata: outputs.affinity_metadata,
        harmonization: outputs.harmonization,
        missingness: outputs.missingness,
    };

    let bundle_path = output_dir.join(BUNDLE_FILE_NAME);
    let file = File::create(&bundle_path).map_err(|e| polars_err(Box::new(e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &bundle).map_err(|e| polars_err(Box::new(e)))?;
    writer.flush().map_err(|e| polars_err(Box::new(e)))?;
    info!("Output bundle written to {}", bundle_path.display());

    let mut affinity_df = outputs.affinity.to_dataframe(DRUG_COL)?;
    dataframe_to_csv(&mut affinity_df, &output_dir.join("affinity_matrix.csv"))?;
    let mut response_df = outputs.response.to_dataframe(DRUG_COL)?;
    dataframe_to_csv(&mut response_df, &output_dir.join("response_matrix.csv"))?;

    Ok(bundle_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AffinityTransform;
    use crate::matrix::LabeledMatrix;
    use crate::missingness::missingness_curve;
    use ndarray::array;
    use std::collections::BTreeSet;

    fn metadata() -> AffinityMetadata {
        AffinityMetadata {
            transform: AffinityTransform::NegLog10Molar,
            decorrelation_threshold: 0.95,
            high_confidence_records: 2,
            retained_targets: vec!["CDK9".into()],
            dropped_targets: vec![],
        }
    }

    fn harmonization() -> Harmonization {
        Harmonization {
            synonym_version: "test".into(),
            initial: BTreeSet::new(),
            final_drugs: BTreeSet::from(["a".to_string(), "b".to_string()]),
            overrides_applied: vec![],
        }
    }

    #[test]
    fn bundle_is_keyed_by_drug() {
        let dir = tempfile::tempdir().unwrap();
        let affinity = LabeledMatrix::new(vec!["a".into(), "b".into()], vec!["CDK9".into()], array![[7.0], [f64::NAN]]).unwrap();
        let response = LabeledMatrix::new(vec!["a".into(), "b".into()], vec!["A549".into()], array![[-1.0], [1.0]]).unwrap();
        let curve = missingness_curve(&response, None);
        let meta = metadata();
        let h = harmonization();

        let path = write_outputs(
            PipelineOutputs {
                affinity: &affinity,
                response: &response,
                affinity_metadata: &meta,
                harmonization: &h,
                missingness: MissingnessSummary { cutoff: 15, dropped_cell_lines: &[], curve: &curve },
            },
            dir.path(),
        )
        .unwrap();

        let json: serde_json::Value = serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(json["drugs"], serde_json::json!(["a", "b"]));
        assert_eq!(json["affinity"]["values"][1][0], serde_json::Value::Null);
        assert_eq!(json["response"]["columns"], serde_json::json!(["A549"]));
        assert_eq!(json["affinity_metadata"]["transform"], "NegLog10Molar");
        assert_eq!(json["missingness"]["cutoff"], 15);
        assert!(dir.path().join("affinity_matrix.csv").exists());
        assert!(dir.path().join("response_matrix.csv").exists());
    }

    #[test]
    fn misaligned_matrices_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let affinity = LabeledMatrix::new(vec!["a".into(), "b".into()], vec!["T".into()], array![[1.0], [2.0]]).unwrap();
        let response = LabeledMatrix::new(vec!["b".into(), "a".into()], vec!["X".into()], array![[1.0], [2.0]]).unwrap();
        let curve = missingness_curve(&response, None);
        let meta = metadata();
        let h = harmonization();

        let result = write_outputs(
            PipelineOutputs {
                affinity: &affinity,
                response: &response,
                affinity_metadata: &meta,
                harmonization: &h,
                missingness: MissingnessSummary { cutoff: 15, dropped_cell_lines: &[], curve: &curve },
            },
            dir.path(),
        );
        assert!(result.is_err());
        assert!(!dir.path().join(BUNDLE_FILE_NAME).exists());
    }
}
