//! Missing-value tolerance for cell lines before imputation.
//!
//! The curve (cutoff → cell lines kept) is always computed in full so the
//! operator can inspect it; the cutoff actually applied is configuration.

use std::fs::create_dir_all;
use std::path::Path;

use plotters::prelude::{BitMapBackend, ChartBuilder, Circle, IntoDrawingArea, LineSeries, PathElement,
                        SeriesLabelPosition, BLACK, BLUE, RED, WHITE};
use plotters::style::Color;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::helper_functions::dataframe_to_csv;
use crate::matrix::LabeledMatrix;
use crate::models::polars_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CurvePoint {
    pub threshold: usize,
    pub retained_columns: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingnessCurve {
    pub n_rows: usize,
    pub total_columns: usize,
    pub points: Vec<CurvePoint>,
}

impl MissingnessCurve {
    pub fn retained_at(&self, threshold: usize) -> Option<usize> {
        self.points.iter().find(|p| p.threshold == threshold).map(|p| p.retained_columns)
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let thresholds: Vec<u64> = self.points.iter().map(|p| p.threshold as u64).collect();
        let retained: Vec<u64> = self.points.iter().map(|p| p.retained_columns as u64).collect();
        DataFrame::new(vec![
            Series::new(PlSmallStr::from("max_missing"), thresholds).into(),
            Series::new(PlSmallStr::from("cell_lines_retained"), retained).into(),
        ])
    }
}

/// For every threshold `0..=max_threshold` counts the columns with at most
/// that many missing entries. `None` runs the curve up to the row count.
pub fn missingness_curve(matrix: &LabeledMatrix, max_threshold: Option<usize>) -> MissingnessCurve {
    let max_threshold = max_threshold.unwrap_or(matrix.nrows());
    let mut missing = matrix.missing_per_column();
    missing.sort_unstable();

    let points = (0..=max_threshold)
        .map(|t| CurvePoint {
            threshold: t,
            retained_columns: missing.partition_point(|&m| m <= t),
        })
        .collect();

    MissingnessCurve { n_rows: matrix.nrows(), total_columns: matrix.ncols(), points }
}

#[derive(Debug, Clone)]
pub struct CutoffOutcome {
    pub matrix: LabeledMatrix,
    pub cutoff: usize,
    pub dropped_columns: Vec<String>,
}

/// Drops every column with more than `cutoff` missing entries. Rows are untouched.
pub fn apply_cutoff(matrix: &LabeledMatrix, cutoff: usize) -> CutoffOutcome {
    let missing = matrix.missing_per_column();
    let (keep, drop): (Vec<usize>, Vec<usize>) = (0..matrix.ncols()).partition(|&j| missing[j] <= cutoff);

    let dropped_columns: Vec<String> = drop.iter().map(|&j| matrix.col_labels[j].clone()).collect();
    for &j in &drop {
        debug!("Dropping cell line {} ({} missing > {})", matrix.col_labels[j], missing[j], cutoff);
    }
    info!(
        "Missingness cutoff {}: keeping {} of {} cell lines",
        cutoff,
        keep.len(),
        matrix.ncols()
    );

    CutoffOutcome { matrix: matrix.select_columns(&keep), cutoff, dropped_columns }
}

/// Logs the curve and writes `missingness_curve.csv` / `.png` into `output_dir`.
///
/// Failing to write the CSV is an error; a plot that cannot be drawn is only logged.
pub fn report_curve(curve: &MissingnessCurve, cutoff: usize, output_dir: &Path) -> PolarsResult<()> {
    for p in &curve.points {
        debug!("max missing {:>3} -> {:>5} cell lines", p.threshold, p.retained_columns);
    }
    if let Some(kept) = curve.retained_at(cutoff) {
        info!(
            "Missingness curve over {} thresholds; configured cutoff {} keeps {} of {} cell lines",
            curve.points.len(),
            cutoff,
            kept,
            curve.total_columns
        );
    }

    create_dir_all(output_dir).map_err(|e| polars_err(Box::new(e)))?;
    let mut df = curve.to_dataframe()?;
    let csv_path = output_dir.join("missingness_curve.csv");
    dataframe_to_csv(&mut df, &csv_path)?;
    info!("Missingness curve saved to: {}", csv_path.display());

    let png_path = output_dir.join("missingness_curve.png");
    match draw_curve_plot(&png_path, curve, cutoff) {
        Ok(()) => info!("Missingness curve plot saved to: {}", png_path.display()),
        Err(e) => warn!("Could not draw missingness curve plot {}: {}", png_path.display(), e),
    }
    Ok(())
}

fn draw_curve_plot(output_path: &Path, curve: &MissingnessCurve, cutoff: usize) -> PolarsResult<()> {
    let caption_font = ("sans-serif bold", 26);
    let axis_font = ("sans-serif", 22);
    let label_font = ("sans-serif bold", 18);

    let x_max = curve.points.last().map_or(1, |p| p.threshold.max(1)) as f64;
    let y_max = curve.total_columns.max(1) as f64;

    let root = BitMapBackend::new(output_path, (900, 650)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| polars_err(Box::new(e)))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cell lines retained per missing-value cutoff", caption_font)
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..x_max, 0.0..y_max * 1.05)
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .configure_mesh()
        .x_desc("Max. missing drug responses per cell line")
        .y_desc("Cell lines retained")
        .axis_desc_style(axis_font)
        .label_style(label_font)
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    chart
        .draw_series(LineSeries::new(
            curve.points.iter().map(|p| (p.threshold as f64, p.retained_columns as f64)),
            BLUE.stroke_width(3),
        ))
        .map_err(|e| polars_err(Box::new(e)))?
        .label("retained cell lines")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], BLUE.stroke_width(3)));

    if let Some(kept) = curve.retained_at(cutoff) {
        chart
            .draw_series(LineSeries::new(
                vec![(cutoff as f64, 0.0), (cutoff as f64, y_max * 1.05)],
                RED.mix(0.6).stroke_width(2),
            ))
            .map_err(|e| polars_err(Box::new(e)))?
            .label(format!("cutoff = {cutoff} ({kept} kept)"))
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 25, y)], RED.mix(0.6).stroke_width(2)));
        chart
            .draw_series(std::iter::once(Circle::new((cutoff as f64, kept as f64), 5, RED.filled())))
            .map_err(|e| polars_err(Box::new(e)))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .label_font(label_font)
        .position(SeriesLabelPosition::LowerRight)
        .draw()
        .map_err(|e| polars_err(Box::new(e)))?;

    root.present().map_err(|e| polars_err(Box::new(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// 68 drugs; cell line `j` has `missing[j]` missing entries.
    fn matrix_with_missing(missing: &[usize]) -> LabeledMatrix {
        let n_rows = 68;
        let mut values = Array2::<f64>::ones((n_rows, missing.len()));
        for (j, &m) in missing.iter().enumerate() {
            for i in 0..m {
                values[[i, j]] = f64::NAN;
            }
        }
        LabeledMatrix::new(
            (0..n_rows).map(|i| format!("drug{i}")).collect(),
            (0..missing.len()).map(|j| format!("cell{j}")).collect(),
            values,
        )
        .unwrap()
    }

    #[test]
    fn curve_spans_zero_to_row_count_and_is_monotone() {
        let m = matrix_with_missing(&[0, 3, 15, 16, 20, 68, 3]);
        let curve = missingness_curve(&m, None);

        assert_eq!(curve.points.len(), 69);
        assert_eq!(curve.points.first().unwrap().threshold, 0);
        assert_eq!(curve.points.last().unwrap().threshold, 68);
        for w in curve.points.windows(2) {
            assert!(w[0].retained_columns <= w[1].retained_columns);
        }
        assert_eq!(curve.retained_at(0), Some(1));
        assert_eq!(curve.retained_at(3), Some(3));
        assert_eq!(curve.retained_at(15), Some(4));
        assert_eq!(curve.retained_at(68), Some(7));
    }

    #[test]
    fn explicit_ceiling_limits_the_curve() {
        let m = matrix_with_missing(&[0, 1]);
        let curve = missingness_curve(&m, Some(5));
        assert_eq!(curve.points.len(), 6);
        assert_eq!(curve.retained_at(6), None);
    }

    #[test]
    fn cell_line_over_the_cutoff_is_dropped() {
        let m = matrix_with_missing(&[20, 15, 0]);
        let out = apply_cutoff(&m, 15);

        assert_eq!(out.matrix.col_labels, vec!["cell1", "cell2"]);
        assert_eq!(out.dropped_columns, vec!["cell0"]);
        assert_eq!(out.matrix.nrows(), 68);
        assert_eq!(out.cutoff, 15);
    }

    #[test]
    fn curve_table_has_one_row_per_threshold() {
        let m = matrix_with_missing(&[2, 4]);
        let df = missingness_curve(&m, Some(4)).to_dataframe().unwrap();
        assert_eq!(df.shape(), (5, 2));
    }

    #[test]
    fn report_writes_the_curve_csv() {
        let dir = tempfile::tempdir().unwrap();
        let curve = missingness_curve(&matrix_with_missing(&[0, 3]), Some(4));
        report_curve(&curve, 2, dir.path()).unwrap();
        assert!(dir.path().join("missingness_curve.csv").is_file());
    }

    #[test]
    fn unwritable_curve_csv_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("missingness_curve.csv")).unwrap();
        let curve = missingness_curve(&matrix_with_missing(&[0, 3]), Some(4));
        assert!(report_curve(&curve, 2, dir.path()).is_err());
    }
}
