use std::collections::BTreeSet;

use polars::prelude::*;
use tracing::info;

use crate::matrix::LabeledMatrix;
use crate::models::{CELL_LINE_COL, DRUG_COL, RESPONSE_COL};

const COMPOUND_KEY: &str = "__compound_key";

/// Averages replicate viability values per (drug, cell line) and pivots to
/// a drug × cell-line matrix.
///
/// `screen` must already carry resolved cell-line names in `cell_line`;
/// `compounds` is the harmonized compound table (`compound_id_col` + `drug`).
/// Screen rows whose compound is not in `compounds` are dropped.
pub fn build_response_matrix(
    screen: &DataFrame,
    compounds: &DataFrame,
    compound_id_col: &str,
    value_col: &str,
) -> PolarsResult<LabeledMatrix> {
    let drug_by_id = compounds
        .clone()
        .lazy()
        .select([
            col(compound_id_col).cast(DataType::String).alias(COMPOUND_KEY),
            col(DRUG_COL),
        ]);

    let averaged = screen
        .clone()
        .lazy()
        .with_column(col(compound_id_col).cast(DataType::String).alias(COMPOUND_KEY))
        .join(
            drug_by_id,
            [col(COMPOUND_KEY)],
            [col(COMPOUND_KEY)],
            JoinArgs::new(JoinType::Inner),
        )
        .filter(col(value_col).is_not_null())
        .group_by_stable([col(DRUG_COL), col(CELL_LINE_COL)])
        .agg([
            col(value_col).cast(DataType::Float64).mean().alias(RESPONSE_COL),
            col(value_col).count().alias("replicates"),
        ])
        .collect()?;

    info!(
        "Response table: {} (drug, cell line) pairs from {} screen rows",
        averaged.height(),
        screen.height()
    );

    let matrix = LabeledMatrix::from_long(&averaged, DRUG_COL, CELL_LINE_COL, RESPONSE_COL)?;
    info!(
        "Response matrix: {} drugs x {} cell lines, {} missing",
        matrix.nrows(),
        matrix.ncols(),
        matrix.missing_count()
    );
    Ok(matrix)
}

/// Restricts both matrices to their common drugs, in the same (sorted) order.
pub fn align_rows(affinity: &LabeledMatrix, response: &LabeledMatrix) -> PolarsResult<(LabeledMatrix, LabeledMatrix)> {
    let a: BTreeSet<&String> = affinity.row_labels.iter().collect();
    let r: BTreeSet<&String> = response.row_labels.iter().collect();
    let common: Vec<String> = a.intersection(&r).map(|s| (*s).clone()).collect();

    info!(
        "Aligned drug index: {} drugs ({} affinity-only, {} response-only dropped)",
        common.len(),
        a.len() - common.len(),
        r.len() - common.len()
    );

    Ok((affinity.select_rows(&common)?, response.select_rows(&common)?))
}
