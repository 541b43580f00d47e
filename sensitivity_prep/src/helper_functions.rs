use std::collections::HashSet;
use std::env;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use polars::io::SerWriter;
use polars::prelude::*;
use tracing::{debug, error};

use crate::models::polars_err;

pub fn project_root() -> PathBuf {
    match env::var_os("PROJECT_ROOT") {
        Some(val) => PathBuf::from(val),
        None => {
            // Fall back to current directory if PROJECT_ROOT not set
            env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        }
    }
}

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    read_delimited(file_path, b',')
}

pub fn read_tsv(file_path: &Path) -> PolarsResult<DataFrame> {
    read_delimited(file_path, b'\t')
}

/// Reads a delimited text table with a header row.
pub fn read_delimited(file_path: &Path, separator: u8) -> PolarsResult<DataFrame> {
    if !file_path.exists() {
        error!("Input table not found: {}", file_path.display());
        return Err(PolarsError::ComputeError(
            format!("{} does not exist", file_path.display()).into(),
        ));
    }

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .map_parse_options(|mut o| {
            o.separator = separator;
            o.encoding = CsvEncoding::LossyUtf8;
            o.truncate_ragged_lines = true;
            o
        })
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()?;

    debug!("Read {} rows x {} cols from {}", df.height(), df.width(), file_path.display());
    Ok(df)
}

pub fn dataframe_to_csv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|e| polars_err(Box::new(e)))?;
    }
    let mut file = File::create(path).map_err(|e| polars_err(Box::new(e)))?;
    CsvWriter::new(&mut file).include_header(true).finish(df)
}

/// Fails with a readable message when `name` is not a column of `df`.
pub fn require_column(df: &DataFrame, name: &str, table: &str) -> PolarsResult<()> {
    if df.get_column_names().iter().any(|c| c.as_str() == name) {
        Ok(())
    } else {
        Err(PolarsError::ColumnNotFound(
            format!("column '{}' missing from {} table (have {:?})", name, table, df.get_column_names()).into(),
        ))
    }
}

/// Keeps the first row for every distinct value of `key`; later duplicates are dropped.
/// Null keys are never treated as duplicates of each other.
pub fn keep_first_occurrence(df: &DataFrame, key: &str) -> PolarsResult<DataFrame> {
    let keys = df.column(key)?.cast(&DataType::String)?;
    let mut seen: HashSet<String> = HashSet::new();
    let mask: Vec<bool> = keys
        .str()?
        .into_iter()
        .map(|k| match k {
            Some(k) => seen.insert(k.to_string()),
            None => true,
        })
        .collect();
    df.filter(&BooleanChunked::from_slice(PlSmallStr::from("keep"), &mask))
}
