//! Preprocessing plus estimator, fitted and persisted as one unit

use crate::error::{MlError, Result};
use crate::features::{FeatureFrame, FeatureMeta};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::estimator::{EstimatorSpec, FittedEstimator};
use super::preprocess::Preprocessor;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedState {
    preprocessor: Preprocessor,
    estimator: FittedEstimator,
}

/// A model pipeline bound to a feature layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPipeline {
    pub spec: EstimatorSpec,
    pub feature_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    fitted: Option<FittedState>,
}

impl ModelPipeline {
    pub fn new(spec: EstimatorSpec, meta: &FeatureMeta) -> Self {
        Self {
            spec,
            feature_columns: meta.feature_columns.clone(),
            numeric_columns: meta.numeric_columns.clone(),
            categorical_columns: meta.categorical_columns.clone(),
            fitted: None,
        }
    }

    /// Same configuration with no fitted state
    pub fn unfitted(&self) -> Self {
        Self {
            fitted: None,
            ..self.clone()
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn has_probabilities(&self) -> bool {
        self.spec.has_probabilities()
    }

    pub fn fit(&mut self, frame: &FeatureFrame, y: &[f64]) -> Result<()> {
        if frame.len() != y.len() {
            return Err(MlError::DimensionMismatch {
                expected: y.len(),
                actual: frame.len(),
            });
        }
        let preprocessor = Preprocessor::fit(frame, &self.numeric_columns, &self.categorical_columns)?;
        let x = preprocessor.transform(frame)?;
        let estimator = self.spec.fit(x.view(), y)?;
        self.fitted = Some(FittedState {
            preprocessor,
            estimator,
        });
        Ok(())
    }

    fn scores(&self, frame: &FeatureFrame) -> Result<Vec<f64>> {
        let state = self.fitted.as_ref().ok_or(MlError::NotFitted)?;
        let x = state.preprocessor.transform(frame)?;
        Ok(x.rows().into_iter().map(|row| state.estimator.score_row(row)).collect())
    }

    /// Class labels (0/1) for classifiers, values for regressors
    pub fn predict(&self, frame: &FeatureFrame) -> Result<Vec<f64>> {
        let scores = self.scores(frame)?;
        if self.has_probabilities() {
            Ok(scores.into_iter().map(|p| if p >= 0.5 { 1.0 } else { 0.0 }).collect())
        } else {
            Ok(scores)
        }
    }

    /// Positive-class probabilities; `None` when the family has no probability output
    pub fn predict_proba(&self, frame: &FeatureFrame) -> Result<Option<Vec<f64>>> {
        if !self.has_probabilities() {
            return Ok(None);
        }
        self.scores(frame).map(Some)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.is_fitted() {
            return Err(MlError::NotFitted);
        }
        let body = serde_json::to_vec(self)?;
        fs::write(path, body).map_err(|e| MlError::io(path, e))?;
        info!(path = %path.display(), "Model pipeline saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MlError::ArtifactNotFound(path.to_path_buf()));
        }
        let body = fs::read(path).map_err(|e| MlError::io(path, e))?;
        let pipeline: ModelPipeline = serde_json::from_slice(&body)?;
        if !pipeline.is_fitted() {
            return Err(MlError::NotFitted);
        }
        Ok(pipeline)
    }
}
