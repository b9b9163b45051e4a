//! Tree ensembles: gradient boosting and random forests

use crate::error::{MlError, Result};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::linear::sigmoid;
use super::tree::{RegressionTree, TrainingData, TreeParams};

/// Loss optimised by a boosted ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostingLoss {
    /// Binary log-loss; raw scores are log-odds
    LogLoss,
    SquaredError,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub tree: TreeParams,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            subsample: 1.0,
            tree: TreeParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTrees {
    pub loss: BoostingLoss,
    pub init: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl BoostedTrees {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[f64],
        weights: &[f64],
        loss: BoostingLoss,
        params: &BoostingParams,
        seed: u64,
    ) -> Self {
        let n = y.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let total_w: f64 = weights.iter().sum::<f64>().max(f64::EPSILON);
        let weighted_mean = y.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total_w;

        let init = match loss {
            BoostingLoss::LogLoss => {
                let p = weighted_mean.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
            BoostingLoss::SquaredError => weighted_mean,
        };

        let mut scores = vec![init; n];
        let mut trees = Vec::with_capacity(params.n_estimators);
        let sample_size = ((n as f64) * params.subsample.clamp(0.0, 1.0)).round().max(1.0) as usize;
        let mut all_rows: Vec<usize> = (0..n).collect();

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = match loss {
                BoostingLoss::LogLoss => y.iter().zip(&scores).map(|(t, s)| t - sigmoid(*s)).collect(),
                BoostingLoss::SquaredError => y.iter().zip(&scores).map(|(t, s)| t - s).collect(),
            };

            let rows: Vec<usize> = if sample_size < n {
                all_rows.shuffle(&mut rng);
                all_rows[..sample_size].to_vec()
            } else {
                all_rows.clone()
            };

            let data = TrainingData {
                x: x.view(),
                y: &residuals,
                weights,
            };
            let mut tree = RegressionTree::fit(&data, &rows, &params.tree, &mut rng);

            if loss == BoostingLoss::LogLoss {
                newton_leaf_update(&mut tree, x, &residuals, &scores, weights, &rows);
            }

            for (score, row) in scores.iter_mut().zip(x.rows()) {
                *score += params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        Self {
            loss,
            init,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn raw_score(&self, row: ArrayView1<f64>) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }

    /// Positive-class probability under log-loss, the raw score otherwise
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match self.loss {
            BoostingLoss::LogLoss => sigmoid(self.raw_score(row)),
            BoostingLoss::SquaredError => self.raw_score(row),
        }
    }

    pub fn importances(&self, width: usize) -> Vec<f64> {
        sum_importances(self.trees.iter(), width)
    }
}

/// One Newton step per leaf: `sum(w * r) / sum(w * p * (1 - p))`
fn newton_leaf_update(
    tree: &mut RegressionTree,
    x: ArrayView2<f64>,
    residuals: &[f64],
    scores: &[f64],
    weights: &[f64],
    rows: &[usize],
) {
    let mut sums: std::collections::BTreeMap<usize, (f64, f64)> = std::collections::BTreeMap::new();
    for &r in rows {
        let p = sigmoid(scores[r]);
        let entry = sums.entry(tree.leaf_index(x.row(r))).or_default();
        entry.0 += weights[r] * residuals[r];
        entry.1 += weights[r] * p * (1.0 - p);
    }
    for (leaf, (numerator, denominator)) in sums {
        let value = if denominator.abs() < 1e-150 {
            0.0
        } else {
            numerator / denominator
        };
        tree.set_leaf_value(leaf, value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            tree: TreeParams {
                max_depth: None,
                ..TreeParams::default()
            },
            bootstrap: true,
        }
    }
}

/// Bagged trees; predictions are the mean over trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Trees are grown on a dedicated pool of `workers` threads (0 = all cores)
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[f64],
        weights: &[f64],
        params: &ForestParams,
        seed: u64,
        workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| MlError::Internal(format!("failed to build worker pool: {}", e)))?;

        let n = y.len();
        let data = TrainingData { x: x.view(), y, weights };
        let trees: Vec<RegressionTree> = pool.install(|| {
            (0..params.n_estimators)
                .into_par_iter()
                .map(|i| {
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                    let rows: Vec<usize> = if params.bootstrap && n > 0 {
                        (0..n).map(|_| rng.random_range(0..n)).collect()
                    } else {
                        (0..n).collect()
                    };
                    RegressionTree::fit(&data, &rows, &params.tree, &mut rng)
                })
                .collect()
        });
        debug!(trees = trees.len(), workers, "Random forest grown");
        Ok(Self { trees })
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn importances(&self, width: usize) -> Vec<f64> {
        sum_importances(self.trees.iter(), width)
    }
}

/// Impurity importances summed over trees, normalised to sum to one
fn sum_importances<'a>(trees: impl Iterator<Item = &'a RegressionTree>, width: usize) -> Vec<f64> {
    let mut total = vec![0.0; width];
    for tree in trees {
        for (acc, v) in total.iter_mut().zip(tree.importances()) {
            *acc += v;
        }
    }
    let sum: f64 = total.iter().sum();
    if sum > 0.0 {
        total.iter_mut().for_each(|v| *v /= sum);
    }
    total
}
