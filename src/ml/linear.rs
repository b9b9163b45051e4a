//! L2-regularised logistic regression fitted by batch gradient descent

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Ridge penalty on the coefficients (not the intercept)
    pub l2: f64,
    pub tolerance: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.1,
            l2: 1.0,
            tolerance: 1e-7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LogisticModel {
    /// Minimise weighted mean log-loss plus `l2 / (2 * total_weight) * |w|^2`
    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, weights: ArrayView1<f64>, params: &LogisticParams) -> Self {
        let mut coefficients = Array1::<f64>::zeros(x.ncols());
        let mut intercept = 0.0;
        let total_weight = weights.sum().max(f64::EPSILON);
        let mut previous_loss = f64::INFINITY;

        for iteration in 0..params.max_iter {
            let p = (x.dot(&coefficients) + intercept).mapv(sigmoid);
            let errors = (&p - &y) * &weights;

            let loss = p
                .iter()
                .zip(y.iter())
                .zip(weights.iter())
                .map(|((&p, &t), &w)| {
                    let clipped = p.clamp(1e-15, 1.0 - 1e-15);
                    -w * (t * clipped.ln() + (1.0 - t) * (1.0 - clipped).ln())
                })
                .sum::<f64>();
            let penalty = coefficients.dot(&coefficients) * params.l2 / 2.0;
            let loss = (loss + penalty) / total_weight;

            let gradient = (x.t().dot(&errors) + &coefficients * params.l2) / total_weight;
            coefficients.scaled_add(-params.learning_rate, &gradient);
            intercept -= params.learning_rate * errors.sum() / total_weight;

            if (previous_loss - loss).abs() < params.tolerance {
                debug!(iteration, loss, "Logistic regression converged");
                break;
            }
            previous_loss = loss;
        }

        Self {
            coefficients,
            intercept,
        }
    }

    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> f64 {
        sigmoid(self.intercept + self.coefficients.dot(&row))
    }
}
