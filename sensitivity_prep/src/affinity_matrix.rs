use polars::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::config::AffinityTransform;
use crate::matrix::LabeledMatrix;
use crate::models::{TargetConfidence, AFFINITY_COL, CONFIDENCE_COL, DRUG_COL, TARGET_COL};

/// Targets need at least this many drugs with values on both sides before a
/// correlation between them is trusted.
const MIN_SHARED_DRUGS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct DroppedTarget {
    pub target: String,
    pub correlated_with: String,
    pub r: f64,
}

/// What the affinity post-processing did, persisted next to the matrix.
#[derive(Debug, Clone, Serialize)]
pub struct AffinityMetadata {
    pub transform: AffinityTransform,
    pub decorrelation_threshold: f64,
    pub high_confidence_records: usize,
    pub retained_targets: Vec<String>,
    pub dropped_targets: Vec<DroppedTarget>,
}

/// Keeps only records whose classification parses as [`TargetConfidence::High`].
pub fn high_confidence(targets: &DataFrame) -> PolarsResult<DataFrame> {
    let mask: Vec<bool> = targets
        .column(CONFIDENCE_COL)?
        .str()?
        .into_iter()
        .map(|label| label.map_or(false, |l| TargetConfidence::parse(l).is_high()))
        .collect();
    let out = targets.filter(&BooleanChunked::from_slice(PlSmallStr::from("high"), &mask))?;
    debug!("High-confidence records: {} of {}", out.height(), targets.height());
    Ok(out)
}

/// Drug × target matrix of raw affinity values from high-confidence records.
pub fn build_affinity_matrix(targets: &DataFrame) -> PolarsResult<(LabeledMatrix, usize)> {
    let high = high_confidence(targets)?;
    let matrix = LabeledMatrix::from_long(&high, DRUG_COL, TARGET_COL, AFFINITY_COL)?;
    info!(
        "Affinity matrix: {} drugs x {} targets, {} of {} cells observed",
        matrix.nrows(),
        matrix.ncols(),
        matrix.nrows() * matrix.ncols() - matrix.missing_count(),
        matrix.nrows() * matrix.ncols()
    );
    Ok((matrix, high.height()))
}

/// Value transform + feature decorrelation applied to the raw affinity matrix.
pub trait AffinityProcessor {
    fn process(&self, matrix: &LabeledMatrix, high_confidence_records: usize) -> PolarsResult<(LabeledMatrix, AffinityMetadata)>;
}

pub struct TransformAndDecorrelate {
    pub transform: AffinityTransform,
    pub threshold: f64,
}

impl TransformAndDecorrelate {
    fn transform_value(&self, v: f64) -> f64 {
        match self.transform {
            AffinityTransform::Identity => v,
            AffinityTransform::NegLog10Molar => {
                if v.is_nan() || v <= 0.0 {
                    f64::NAN
                } else {
                    9.0 - v.log10()
                }
            }
        }
    }
}

impl AffinityProcessor for TransformAndDecorrelate {
    fn process(&self, matrix: &LabeledMatrix, high_confidence_records: usize) -> PolarsResult<(LabeledMatrix, AffinityMetadata)> {
        let transformed = matrix.with_values(matrix.values.mapv(|v| self.transform_value(v)))?;

        let mut kept: Vec<usize> = Vec::new();
        let mut dropped = Vec::new();
        for j in 0..transformed.ncols() {
            let partner = kept.iter().find_map(|&k| {
                pairwise_pearson(&transformed, k, j)
                    .filter(|r| r.abs() >= self.threshold)
                    .map(|r| (k, r))
            });
            match partner {
                Some((k, r)) => {
                    debug!(
                        "Dropping target {} (r = {:.3} with {})",
                        transformed.col_labels[j], r, transformed.col_labels[k]
                    );
                    dropped.push(DroppedTarget {
                        target: transformed.col_labels[j].clone(),
                        correlated_with: transformed.col_labels[k].clone(),
                        r,
                    });
                }
                None => kept.push(j),
            }
        }

        let processed = transformed.select_columns(&kept);
        info!(
            "Affinity decorrelation (|r| >= {}): kept {} targets, dropped {}",
            self.threshold,
            processed.ncols(),
            dropped.len()
        );

        let metadata = AffinityMetadata {
            transform: self.transform,
            decorrelation_threshold: self.threshold,
            high_confidence_records,
            retained_targets: processed.col_labels.clone(),
            dropped_targets: dropped,
        };
        Ok((processed, metadata))
    }
}

/// Pearson r between two columns over rows where both are observed.
fn pairwise_pearson(m: &LabeledMatrix, a: usize, b: usize) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = m
        .values
        .column(a)
        .iter()
        .zip(m.values.column(b).iter())
        .filter(|(x, y)| !x.is_nan() && !y.is_nan())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xs.len() < MIN_SHARED_DRUGS {
        return None;
    }
    let sx = xs.iter().std_dev();
    let sy = ys.iter().std_dev();
    if !(sx > 0.0 && sy > 0.0) {
        return None;
    }
    Some(xs.iter().covariance(ys.iter()) / (sx * sy))
}
