//! Attaches canonical names to records that only carry internal identifiers.
//!
//! Rows whose identifier has no (non-null) name in the lookup table are
//! dropped; only the survivor count is reported.

use polars::prelude::*;
use tracing::info;

use crate::helper_functions::keep_first_occurrence;

const JOIN_KEY: &str = "__resolver_key";

#[derive(Debug)]
pub struct Resolution {
    pub frame: DataFrame,
    pub input_rows: usize,
    pub resolved_rows: usize,
}

impl Resolution {
    pub fn dropped_rows(&self) -> usize {
        self.input_rows - self.resolved_rows
    }
}

/// Left-joins `lookup[lookup_name_col]` onto `records` by identifier and keeps
/// only rows whose attached name (stored as `out_col`) is non-null.
///
/// Both identifier columns are compared as strings so integer and string
/// encoded IDs line up. Duplicated identifiers in the lookup resolve to their
/// first listed name.
pub fn resolve_identifiers(
    records: &DataFrame,
    lookup: &DataFrame,
    id_col: &str,
    lookup_id_col: &str,
    lookup_name_col: &str,
    out_col: &str,
) -> PolarsResult<Resolution> {
    let input_rows = records.height();

    let lookup = lookup
        .clone()
        .lazy()
        .select([
            col(lookup_id_col).cast(DataType::String).alias(JOIN_KEY),
            col(lookup_name_col).cast(DataType::String).alias(out_col),
        ])
        .filter(col(out_col).is_not_null())
        .collect()?;
    // Nameless entries are gone, so a duplicate id resolves to its first real name.
    let lookup = keep_first_occurrence(&lookup, JOIN_KEY)?;

    let frame = records
        .clone()
        .lazy()
        .with_column(col(id_col).cast(DataType::String).alias(JOIN_KEY))
        .join(
            lookup.lazy(),
            [col(JOIN_KEY)],
            [col(JOIN_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .filter(col(out_col).is_not_null())
        .collect()?
        .drop(JOIN_KEY)?;

    let resolved_rows = frame.height();
    info!(
        "Resolved '{}' -> '{}': {} of {} rows kept",
        id_col, out_col, resolved_rows, input_rows
    );

    Ok(Resolution { frame, input_rows, resolved_rows })
}

/// Bridges mutation calls (keyed by DepMap ID) to the canonical cell-line
/// names used by the screen, dropping calls for cell lines the screen's
/// annotation table does not know.
pub fn resolve_mutations(
    mutations: &DataFrame,
    depmap_annotation: &DataFrame,
    cell_lines: &DataFrame,
    depmap_id_col: &str,
    depmap_name_col: &str,
    cell_line_name_col: &str,
    out_col: &str,
) -> PolarsResult<Resolution> {
    let bridged = resolve_identifiers(
        mutations,
        depmap_annotation,
        depmap_id_col,
        depmap_id_col,
        depmap_name_col,
        out_col,
    )?;

    let known = cell_lines
        .clone()
        .lazy()
        .select([col(cell_line_name_col).cast(DataType::String).alias(out_col)])
        .filter(col(out_col).is_not_null());

    let frame = bridged
        .frame
        .lazy()
        .join(known, [col(out_col)], [col(out_col)], JoinArgs::new(JoinType::Semi))
        .collect()?;

    let resolved_rows = frame.height();
    info!(
        "Mutation calls matched to screened cell lines: {} of {}",
        resolved_rows,
        mutations.height()
    );

    Ok(Resolution { frame, input_rows: mutations.height(), resolved_rows })
}
