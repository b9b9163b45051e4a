//! Weighted least-squares regression trees
//!
//! The shared base learner of the boosting and forest families. On 0/1
//! targets the squared-error criterion ranks splits the same way Gini does,
//! and a leaf's weighted mean is the positive-class probability.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Growth limits for one tree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split (`None` = all)
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: Some(3),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Training view: the design matrix, targets and per-row weights
pub struct TrainingData<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: &'a [f64],
    pub weights: &'a [f64],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total impurity decrease contributed by each input column
    importances: Vec<f64>,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree over `rows` (duplicates allowed, as in bootstrap samples)
    pub fn fit<R: Rng>(data: &TrainingData, rows: &[usize], params: &TreeParams, rng: &mut R) -> Self {
        let width = data.x.ncols();
        let mut tree = RegressionTree {
            nodes: Vec::new(),
            importances: vec![0.0; width],
        };
        let mut features: Vec<usize> = (0..width).collect();
        tree.grow(data, rows.to_vec(), 0, params, &mut features, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        data: &TrainingData,
        rows: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        features: &mut Vec<usize>,
        rng: &mut R,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: weighted_mean(data, &rows),
        });

        let depth_left = params.max_depth.map_or(true, |d| depth < d);
        if !depth_left || rows.len() < params.min_samples_split.max(2) {
            return id;
        }
        let Some(best) = best_split(data, &rows, params, features, rng) else {
            return id;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .partition(|&&r| data.x[[r, best.feature]] <= best.threshold);
        self.importances[best.feature] += best.gain;

        let left = self.grow(data, left_rows, depth + 1, params, features, rng);
        let right = self.grow(data, right_rows, depth + 1, params, features, rng);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    /// Index of the leaf `row` falls into
    pub fn leaf_index(&self, row: ArrayView1<f64>) -> usize {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { .. } => return id,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    id = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        match self.nodes.get(self.leaf_index(row)) {
            Some(Node::Leaf { value }) => *value,
            _ => 0.0,
        }
    }

    /// Overwrite a leaf's output (used for Newton leaf updates)
    pub fn set_leaf_value(&mut self, id: usize, new_value: f64) {
        if let Some(Node::Leaf { value }) = self.nodes.get_mut(id) {
            *value = new_value;
        }
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

fn weighted_mean(data: &TrainingData, rows: &[usize]) -> f64 {
    let (mut sw, mut swy) = (0.0, 0.0);
    for &r in rows {
        sw += data.weights[r];
        swy += data.weights[r] * data.y[r];
    }
    if sw > 0.0 {
        swy / sw
    } else {
        0.0
    }
}

/// Best weighted-variance reduction over a random subset of features
fn best_split<R: Rng>(
    data: &TrainingData,
    rows: &[usize],
    params: &TreeParams,
    features: &mut [usize],
    rng: &mut R,
) -> Option<Candidate> {
    let considered = match params.max_features {
        Some(k) if k < features.len() => {
            features.shuffle(rng);
            k.max(1)
        }
        _ => features.len(),
    };

    let (mut total_w, mut total_wy, mut total_wyy) = (0.0, 0.0, 0.0);
    for &r in rows {
        let (w, y) = (data.weights[r], data.y[r]);
        total_w += w;
        total_wy += w * y;
        total_wyy += w * y * y;
    }
    if total_w <= 0.0 {
        return None;
    }
    let parent_sse = total_wyy - total_wy * total_wy / total_w;
    if parent_sse <= 1e-12 {
        return None;
    }

    let min_leaf = params.min_samples_leaf.max(1);
    let mut best: Option<Candidate> = None;
    let mut sorted = rows.to_vec();

    for &feature in &features[..considered] {
        sorted.sort_by(|&a, &b| data.x[[a, feature]].total_cmp(&data.x[[b, feature]]));

        let (mut left_w, mut left_wy, mut left_wyy) = (0.0, 0.0, 0.0);
        for k in 0..sorted.len() - 1 {
            let r = sorted[k];
            let (w, y) = (data.weights[r], data.y[r]);
            left_w += w;
            left_wy += w * y;
            left_wyy += w * y * y;

            let here = data.x[[r, feature]];
            let next = data.x[[sorted[k + 1], feature]];
            if here == next || k + 1 < min_leaf || sorted.len() - k - 1 < min_leaf {
                continue;
            }
            let right_w = total_w - left_w;
            if left_w <= 0.0 || right_w <= 0.0 {
                continue;
            }
            let right_wy = total_wy - left_wy;
            let right_wyy = total_wyy - left_wyy;
            let sse = (left_wyy - left_wy * left_wy / left_w) + (right_wyy - right_wy * right_wy / right_w);
            let gain = parent_sse - sse;

            if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Candidate {
                    feature,
                    threshold: (here + next) / 2.0,
                    gain,
                });
            }
        }
    }
    best
}
