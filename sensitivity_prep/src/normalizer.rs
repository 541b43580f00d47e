use ndarray::Axis;
use polars::prelude::{PolarsError, PolarsResult};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::matrix::LabeledMatrix;

/// Column-wise z-score: every column (cell line) ends with mean 0 and sample
/// standard deviation 1 across its rows (drugs).
///
/// Columns are standardized per sample because downstream models compare
/// drugs within a cell line. A column that is constant, has fewer than two
/// rows or still contains missing values is an error naming the column.
pub fn standardize_columns(matrix: &LabeledMatrix) -> PolarsResult<LabeledMatrix> {
    let mut values = matrix.values.clone();

    for (j, mut column) in values.axis_iter_mut(Axis(1)).enumerate() {
        let label = &matrix.col_labels[j];
        if column.len() < 2 {
            return Err(PolarsError::ComputeError(
                format!("cannot standardize column '{label}': needs at least two rows").into(),
            ));
        }
        if column.iter().any(|v| v.is_nan()) {
            return Err(PolarsError::ComputeError(
                format!("cannot standardize column '{label}': contains missing values").into(),
            ));
        }

        let mean = column.iter().mean();
        let sd = column.iter().std_dev();
        if !(sd.is_finite() && sd > 0.0) {
            return Err(PolarsError::ComputeError(
                format!("cannot standardize column '{label}': zero variance (all values {mean})").into(),
            ));
        }

        debug!("{:<25} μ = {:>10.6},  σ = {:>10.6}", label, mean, sd);
        column.mapv_inplace(|v| (v - mean) / sd);
    }

    info!("Standardized {} columns over {} rows", matrix.ncols(), matrix.nrows());
    matrix.with_values(values)
}
