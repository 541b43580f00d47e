//! Missing-value imputation for the reduced response matrix.
//!
//! Input orientation: samples (cell lines) as rows, features (drugs) as
//! columns, `NaN` marking gaps. Output has the same shape, no `NaN`, and every
//! observed entry unchanged.

use log::{debug, info};
use ndarray::{Array2, Axis};
use polars::prelude::{PolarsError, PolarsResult};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::ImputerConfig;
use crate::forest::{ForestConfig, RandomForestRegressor};

pub trait Imputer {
    fn impute(&self, x: &Array2<f64>) -> PolarsResult<Array2<f64>>;
}

/// Iterative random-forest imputation.
///
/// Starts from column means, then repeatedly regresses each incomplete
/// column on all other columns and re-predicts its gaps, visiting columns
/// from fewest to most missing. Stops when the relative change between
/// sweeps grows (keeping the earlier sweep) or after `max_iter` sweeps.
#[derive(Debug, Clone)]
pub struct RandomForestImputer {
    pub forest: ForestConfig,
    pub max_iter: usize,
    pub seed: u64,
}

impl From<&ImputerConfig> for RandomForestImputer {
    fn from(cfg: &ImputerConfig) -> Self {
        Self {
            forest: ForestConfig {
                n_trees: cfg.n_trees,
                max_depth: cfg.max_depth,
                min_samples_leaf: cfg.min_samples_leaf,
                max_features: cfg.max_features,
            },
            max_iter: cfg.max_iter,
            seed: cfg.seed,
        }
    }
}

impl Imputer for RandomForestImputer {
    fn impute(&self, x: &Array2<f64>) -> PolarsResult<Array2<f64>> {
        let (n_rows, n_cols) = x.dim();
        let missing = x.mapv(|v| v.is_nan());
        let missing_per_col: Vec<usize> = missing
            .axis_iter(Axis(1))
            .map(|c| c.iter().filter(|m| **m).count())
            .collect();

        if let Some(j) = missing_per_col.iter().position(|&m| m == n_rows && n_rows > 0) {
            return Err(PolarsError::ComputeError(
                format!("cannot impute: feature column {j} has no observed values").into(),
            ));
        }
        // With a single feature every gap is a fully missing row; the mean fill handles it.
        if let Some(i) = missing.axis_iter(Axis(0)).position(|r| n_cols > 1 && r.iter().all(|m| *m)) {
            return Err(PolarsError::ComputeError(
                format!("cannot impute: sample row {i} has no observed values").into(),
            ));
        }

        let total_missing: usize = missing_per_col.iter().sum();
        if total_missing == 0 {
            return Ok(x.clone());
        }
        info!(
            "Imputing {} of {} entries ({} samples x {} features)",
            total_missing,
            n_rows * n_cols,
            n_rows,
            n_cols
        );

        let mut current = x.clone();
        for (j, mut column) in current.axis_iter_mut(Axis(1)).enumerate() {
            let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            let mean = observed.iter().sum::<f64>() / observed.len() as f64;
            column.mapv_inplace(|v| if v.is_nan() { mean } else { v });
            debug!("feature {}: initial fill {:.4}", j, mean);
        }

        if n_cols < 2 {
            return Ok(current);
        }

        let mut order: Vec<usize> = (0..n_cols).filter(|&j| missing_per_col[j] > 0).collect();
        order.sort_by_key(|&j| missing_per_col[j]);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut previous_delta = f64::INFINITY;

        for iteration in 0..self.max_iter {
            let previous = current.clone();

            for &j in &order {
                let others: Vec<usize> = (0..n_cols).filter(|&k| k != j).collect();
                let (obs_rows, mis_rows): (Vec<usize>, Vec<usize>) = (0..n_rows).partition(|&i| !missing[[i, j]]);

                let features = current.select(Axis(1), &others);
                let train_x = features.select(Axis(0), &obs_rows);
                let train_y: Vec<f64> = obs_rows.iter().map(|&i| current[[i, j]]).collect();

                let forest = RandomForestRegressor::fit(train_x.view(), &train_y, &self.forest, &mut rng)?;
                let predicted = forest.predict(features.select(Axis(0), &mis_rows).view());
                for (&i, v) in mis_rows.iter().zip(predicted) {
                    current[[i, j]] = v;
                }
            }

            let change: f64 = (&current - &previous).mapv(|d| d * d).sum();
            let scale: f64 = current.mapv(|v| v * v).sum();
            let delta = if scale > 0.0 { change / scale } else { 0.0 };
            info!("Imputation sweep {}: relative change {:.6}", iteration + 1, delta);

            if delta > previous_delta {
                info!("Relative change increased, keeping sweep {}", iteration);
                return Ok(previous);
            }
            previous_delta = delta;
        }

        Ok(current)
    }
}
