//! Dense labelled matrix shared by the affinity and response builders.
//!
//! Missing entries are `NaN`; they are never silently turned into zeros.

use std::collections::{BTreeSet, HashMap};

use ndarray::{Array2, Axis};
use polars::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    pub row_labels: Vec<String>,
    pub col_labels: Vec<String>,
    pub values: Array2<f64>,
}

impl LabeledMatrix {
    pub fn new(row_labels: Vec<String>, col_labels: Vec<String>, values: Array2<f64>) -> PolarsResult<Self> {
        if values.dim() != (row_labels.len(), col_labels.len()) {
            return Err(PolarsError::ShapeMismatch(
                format!(
                    "matrix is {:?} but got {} row and {} column labels",
                    values.dim(),
                    row_labels.len(),
                    col_labels.len()
                )
                .into(),
            ));
        }
        Ok(Self { row_labels, col_labels, values })
    }

    /// Pivots a long table into a `row_col × col_col` matrix of `value_col`.
    ///
    /// Labels are sorted. Repeated (row, col) pairs are averaged, null values
    /// are ignored, and pairs that never occur stay `NaN`.
    pub fn from_long(df: &DataFrame, row_col: &str, col_col: &str, value_col: &str) -> PolarsResult<Self> {
        let rows = df.column(row_col)?.cast(&DataType::String)?;
        let cols = df.column(col_col)?.cast(&DataType::String)?;
        let vals = df.column(value_col)?.cast(&DataType::Float64)?;
        let (rows, cols, vals) = (rows.str()?, cols.str()?, vals.f64()?);

        let row_labels: Vec<String> = rows.into_iter().flatten().map(str::to_string).collect::<BTreeSet<_>>().into_iter().collect();
        let col_labels: Vec<String> = cols.into_iter().flatten().map(str::to_string).collect::<BTreeSet<_>>().into_iter().collect();
        let row_idx: HashMap<&str, usize> = row_labels.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
        let col_idx: HashMap<&str, usize> = col_labels.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();

        let shape = (row_labels.len(), col_labels.len());
        let mut sums = Array2::<f64>::zeros(shape);
        let mut counts = Array2::<u32>::zeros(shape);

        for ((r, c), v) in rows.into_iter().zip(cols.into_iter()).zip(vals.into_iter()) {
            if let (Some(r), Some(c), Some(v)) = (r, c, v) {
                if v.is_nan() {
                    continue;
                }
                let (i, j) = (row_idx[r], col_idx[c]);
                sums[[i, j]] += v;
                counts[[i, j]] += 1;
            }
        }

        let mut values = Array2::<f64>::from_elem(shape, f64::NAN);
        for ((i, j), n) in counts.indexed_iter() {
            if *n > 0 {
                values[[i, j]] = sums[[i, j]] / *n as f64;
            }
        }

        Self::new(row_labels, col_labels, values)
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn missing_per_column(&self) -> Vec<usize> {
        self.values
            .axis_iter(Axis(1))
            .map(|c| c.iter().filter(|v| v.is_nan()).count())
            .collect()
    }

    pub fn select_columns(&self, indices: &[usize]) -> Self {
        Self {
            row_labels: self.row_labels.clone(),
            col_labels: indices.iter().map(|&j| self.col_labels[j].clone()).collect(),
            values: self.values.select(Axis(1), indices),
        }
    }

    /// Reorders / subsets rows to exactly `labels`; unknown labels are an error.
    pub fn select_rows(&self, labels: &[String]) -> PolarsResult<Self> {
        let index: HashMap<&str, usize> = self.row_labels.iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
        let indices = labels
            .iter()
            .map(|l| {
                index.get(l.as_str()).copied().ok_or_else(|| {
                    PolarsError::ComputeError(format!("row '{l}' not present in matrix").into())
                })
            })
            .collect::<PolarsResult<Vec<usize>>>()?;
        Ok(Self {
            row_labels: labels.to_vec(),
            col_labels: self.col_labels.clone(),
            values: self.values.select(Axis(0), &indices),
        })
    }

    pub fn transpose(&self) -> Self {
        Self {
            row_labels: self.col_labels.clone(),
            col_labels: self.row_labels.clone(),
            values: self.values.t().to_owned(),
        }
    }

    /// Same labels, new values of identical shape.
    pub fn with_values(&self, values: Array2<f64>) -> PolarsResult<Self> {
        Self::new(self.row_labels.clone(), self.col_labels.clone(), values)
    }

    /// Row-major values with `None` for missing entries.
    pub fn rows_as_options(&self) -> Vec<Vec<Option<f64>>> {
        self.values
            .axis_iter(Axis(0))
            .map(|r| r.iter().map(|v| if v.is_nan() { None } else { Some(*v) }).collect())
            .collect()
    }

    /// Wide DataFrame: first column `index_name` holds the row labels.
    pub fn to_dataframe(&self, index_name: &str) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(self.ncols() + 1);
        columns.push(Series::new(PlSmallStr::from(index_name), self.row_labels.clone()).into());
        for (j, name) in self.col_labels.iter().enumerate() {
            let col: Vec<Option<f64>> = self
                .values
                .column(j)
                .iter()
                .map(|v| if v.is_nan() { None } else { Some(*v) })
                .collect();
            columns.push(Series::new(PlSmallStr::from(name.as_str()), col).into());
        }
        DataFrame::new(columns)
    }
}
