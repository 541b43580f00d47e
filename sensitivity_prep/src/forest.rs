//! Random-forest regression on dense `ndarray` data.
//!
//! Bagged CART regression trees (variance-reduction splits) with optional
//! feature bagging. Only what the imputer needs: fit on a subset of rows,
//! predict rows.

use log::trace;
use ndarray::{ArrayView1, ArrayView2};
use polars::prelude::{PolarsError, PolarsResult};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_trees: usize,
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` uses all of them.
    pub max_features: Option<usize>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self { n_trees: 100, max_depth: None, min_samples_leaf: 1, max_features: None }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Split { feature: usize, threshold: f64, left: usize, right: usize },
    Leaf { value: f64 },
}

/// Regression tree stored as a flat arena, root at index 0.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[f64],
        samples: Vec<usize>,
        config: &ForestConfig,
        rng: &mut StdRng,
    ) -> PolarsResult<Self> {
        if samples.is_empty() {
            return Err(PolarsError::ComputeError("cannot fit a tree on zero samples".into()));
        }
        if x.nrows() != y.len() {
            return Err(PolarsError::ShapeMismatch(
                format!("{} feature rows but {} targets", x.nrows(), y.len()).into(),
            ));
        }
        let mut tree = Self { nodes: Vec::new() };
        tree.build(x, y, samples, 0, config, rng);
        Ok(tree)
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    fn build(
        &mut self,
        x: ArrayView2<f64>,
        y: &[f64],
        samples: Vec<usize>,
        depth: usize,
        config: &ForestConfig,
        rng: &mut StdRng,
    ) -> usize {
        let n = samples.len();
        let mean = samples.iter().map(|&i| y[i]).sum::<f64>() / n as f64;
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let min_leaf = config.min_samples_leaf.max(1);
        let depth_reached = config.max_depth.map_or(false, |d| depth >= d);
        let pure = samples.iter().all(|&i| (y[i] - y[samples[0]]).abs() < f64::EPSILON);
        if depth_reached || n < 2 * min_leaf || pure {
            return idx;
        }

        let Some(best) = best_split(x, y, &samples, min_leaf, config.max_features, rng) else {
            return idx;
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            samples.into_iter().partition(|&i| x[[i, best.feature]] <= best.threshold);
        trace!(
            "split depth {} on feature {} at {:.4} ({} | {}, score {:.4})",
            depth, best.feature, best.threshold, left.len(), right.len(), best.score
        );

        let left = self.build(x, y, left, depth + 1, config, rng);
        let right = self.build(x, y, right, depth + 1, config, rng);
        self.nodes[idx] = Node::Split { feature: best.feature, threshold: best.threshold, left, right };
        idx
    }
}

/// Chooses the split maximising `S_l²/n_l + S_r²/n_r`, which is equivalent to
/// minimising the summed squared error of both children.
fn best_split(
    x: ArrayView2<f64>,
    y: &[f64],
    samples: &[usize],
    min_leaf: usize,
    max_features: Option<usize>,
    rng: &mut StdRng,
) -> Option<BestSplit> {
    let n_features = x.ncols();
    let k = max_features.unwrap_or(n_features).clamp(1, n_features.max(1));
    let candidates: Vec<usize> = if k >= n_features {
        (0..n_features).collect()
    } else {
        sample(rng, n_features, k).into_vec()
    };

    let n = samples.len();
    let total: f64 = samples.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n as f64;

    let mut best: Option<BestSplit> = None;
    let mut order: Vec<usize> = samples.to_vec();

    for &f in &candidates {
        order.sort_by(|&a, &b| x[[a, f]].total_cmp(&x[[b, f]]));

        let mut left_sum = 0.0;
        for pos in 0..n - 1 {
            left_sum += y[order[pos]];
            let n_left = pos + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let (here, next) = (x[[order[pos], f]], x[[order[pos + 1], f]]);
            if here >= next {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64;
            if score > parent_score + 1e-12 && best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(BestSplit { feature: f, threshold: 0.5 * (here + next), score });
            }
        }
    }
    best
}

/// Bootstrap-aggregated regression trees.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    /// Fits on the rows `x[i]`, `y[i]`; every tree sees a bootstrap resample.
    pub fn fit(x: ArrayView2<f64>, y: &[f64], config: &ForestConfig, rng: &mut StdRng) -> PolarsResult<Self> {
        let n = x.nrows();
        if n == 0 {
            return Err(PolarsError::ComputeError("cannot fit a forest on zero samples".into()));
        }
        if config.n_trees == 0 {
            return Err(PolarsError::ComputeError("n_trees must be > 0".into()));
        }

        let mut trees = Vec::with_capacity(config.n_trees);
        for _ in 0..config.n_trees {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree::fit(x, y, bootstrap, config, rng)?);
        }
        Ok(Self { trees })
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|r| self.predict_row(r)).collect()
    }

    #[cfg(test)]
    fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
