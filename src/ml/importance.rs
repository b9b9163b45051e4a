//! Permutation feature importance over the original feature columns

use crate::error::{MlError, Result};
use crate::features::FeatureFrame;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::metrics::{accuracy, r2};
use super::pipeline::ModelPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportanceParams {
    pub sample_size: usize,
    pub repeats: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Drop in score when one column is shuffled, averaged over repeats
///
/// Scores with accuracy for classifiers and R² for regressors. The result is
/// sorted by absolute importance, largest first.
pub fn permutation_importance(
    pipeline: &ModelPipeline,
    frame: &FeatureFrame,
    y: &[f64],
    params: ImportanceParams,
) -> Result<Vec<FeatureImportance>> {
    if frame.len() != y.len() {
        return Err(MlError::DimensionMismatch {
            expected: y.len(),
            actual: frame.len(),
        });
    }
    if frame.is_empty() {
        return Err(MlError::InsufficientData { required: 1, actual: 0 });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let (frame, y) = if frame.len() > params.sample_size && params.sample_size > 0 {
        let mut rows = index::sample(&mut rng, frame.len(), params.sample_size).into_vec();
        rows.sort_unstable();
        let y: Vec<f64> = rows.iter().map(|&r| y[r]).collect();
        (frame.select_rows(&rows), y)
    } else {
        (frame.clone(), y.to_vec())
    };

    let score = |f: &FeatureFrame| -> Result<f64> {
        let predictions = pipeline.predict(f)?;
        Ok(if pipeline.has_probabilities() {
            accuracy(&y, &predictions)
        } else {
            r2(&y, &predictions)
        })
    };

    let baseline = score(&frame)?;
    let repeats = params.repeats.max(1);
    let mut order: Vec<usize> = (0..frame.len()).collect();
    let mut importances = Vec::with_capacity(pipeline.feature_columns.len());

    for column in &pipeline.feature_columns {
        let mut total = 0.0;
        for _ in 0..repeats {
            order.shuffle(&mut rng);
            let mut permuted = frame.clone();
            permuted.permute_column(column, &order)?;
            total += score(&permuted)?;
        }
        importances.push(FeatureImportance {
            feature: column.clone(),
            importance: baseline - total / repeats as f64,
        });
    }

    importances.sort_by(|a, b| b.importance.abs().total_cmp(&a.importance.abs()));
    debug!(features = importances.len(), rows = frame.len(), baseline, "Permutation importance computed");
    Ok(importances)
}
