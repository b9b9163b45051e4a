//! Estimator families
//!
//! `model_type` is looked up once per run. Families this build cannot
//! provide resolve to gradient boosting and report why, so the caller can
//! log the substitution. Every family declares at construction whether it
//! produces class probabilities.

use crate::config::{Task, TrainingConfig};
use crate::error::{MlError, Result};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::ensemble::{BoostedTrees, BoostingLoss, BoostingParams, ForestParams, RandomForest};
use super::linear::{LogisticModel, LogisticParams};
use super::tree::TreeParams;

/// Estimator families this build can train
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    GradientBoosting,
    RandomForest,
    LogisticRegression,
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelFamily::GradientBoosting => "gradient_boosting",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::LogisticRegression => "logistic_regression",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of looking up a requested `model_type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FamilyResolution {
    Native(ModelFamily),
    Fallback {
        requested: String,
        family: ModelFamily,
        reason: String,
    },
}

impl FamilyResolution {
    pub fn family(&self) -> ModelFamily {
        match self {
            FamilyResolution::Native(f) => *f,
            FamilyResolution::Fallback { family, .. } => *family,
        }
    }

    /// Map a model type name and task to a family
    pub fn resolve(model_type: &str, task: Task) -> Self {
        let requested = model_type.trim().to_lowercase();
        let fallback = |reason: String| FamilyResolution::Fallback {
            requested: requested.clone(),
            family: ModelFamily::GradientBoosting,
            reason,
        };
        match requested.as_str() {
            "gradient_boosting" | "" => FamilyResolution::Native(ModelFamily::GradientBoosting),
            "random_forest" => FamilyResolution::Native(ModelFamily::RandomForest),
            "logistic_regression" if task == Task::Classification => {
                FamilyResolution::Native(ModelFamily::LogisticRegression)
            }
            "logistic_regression" => fallback("logistic regression cannot fit a regression target".to_string()),
            "xgboost" | "lightgbm" => fallback(format!("{} is not available in this build", requested)),
            other => fallback(format!("unknown model type '{}'", other)),
        }
    }
}

/// Everything needed to construct a fresh, unfitted estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    pub family: ModelFamily,
    pub task: Task,
    pub params: Map<String, Value>,
    pub n_jobs: i32,
    pub random_state: u64,
}

impl EstimatorSpec {
    pub fn from_config(config: &TrainingConfig, family: ModelFamily) -> Self {
        Self {
            family,
            task: config.task,
            params: config.model_params.clone(),
            n_jobs: config.n_jobs,
            random_state: config.random_state,
        }
    }

    /// Classifiers expose probabilities, regressors do not
    pub fn has_probabilities(&self) -> bool {
        self.task == Task::Classification
    }

    /// Worker threads for parallel families; 0 lets the pool pick all cores
    fn workers(&self) -> usize {
        if self.n_jobs > 0 {
            self.n_jobs as usize
        } else {
            0
        }
    }

    fn usize_param(&self, key: &str, default: usize) -> Result<usize> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| MlError::Config(format!("model_params.{} must be a non-negative integer", key))),
        }
    }

    fn f64_param(&self, key: &str, default: f64) -> Result<f64> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| MlError::Config(format!("model_params.{} must be a number", key))),
        }
    }

    /// `max_depth` where JSON null means unlimited
    fn depth_param(&self, default: Option<usize>) -> Result<Option<usize>> {
        match self.params.get("max_depth") {
            None => Ok(default),
            Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| MlError::Config("model_params.max_depth must be an integer or null".to_string())),
        }
    }

    /// `class_weight`: "balanced" (default for forests and logistic) or null
    fn balanced(&self, default: bool) -> Result<bool> {
        match self.params.get("class_weight") {
            None => Ok(default),
            Some(Value::Null) => Ok(false),
            Some(Value::String(s)) if s == "balanced" => Ok(true),
            Some(other) => Err(MlError::Config(format!(
                "model_params.class_weight must be \"balanced\" or null, got {}",
                other
            ))),
        }
    }

    fn boosting_params(&self) -> Result<BoostingParams> {
        let defaults = BoostingParams::default();
        Ok(BoostingParams {
            n_estimators: self.usize_param("n_estimators", defaults.n_estimators)?,
            learning_rate: self.f64_param("learning_rate", defaults.learning_rate)?,
            subsample: self.f64_param("subsample", defaults.subsample)?,
            tree: TreeParams {
                max_depth: self.depth_param(defaults.tree.max_depth)?,
                min_samples_leaf: self.usize_param("min_samples_leaf", defaults.tree.min_samples_leaf)?,
                ..defaults.tree
            },
        })
    }

    fn forest_params(&self, width: usize) -> Result<ForestParams> {
        let defaults = ForestParams::default();
        let n_estimators = match self.task {
            Task::Classification => 300,
            Task::Regression => 400,
        };
        let max_features = match self.task {
            Task::Classification => Some(((width as f64).sqrt().ceil() as usize).max(1)),
            Task::Regression => None,
        };
        Ok(ForestParams {
            n_estimators: self.usize_param("n_estimators", n_estimators)?,
            tree: TreeParams {
                max_depth: self.depth_param(defaults.tree.max_depth)?,
                min_samples_leaf: self.usize_param("min_samples_leaf", defaults.tree.min_samples_leaf)?,
                max_features,
                ..defaults.tree
            },
            bootstrap: defaults.bootstrap,
        })
    }

    fn logistic_params(&self) -> Result<LogisticParams> {
        let defaults = LogisticParams::default();
        Ok(LogisticParams {
            max_iter: self.usize_param("max_iter", defaults.max_iter)?,
            learning_rate: self.f64_param("learning_rate", defaults.learning_rate)?,
            l2: self.f64_param("l2", defaults.l2)?,
            ..defaults
        })
    }

    /// Reject parameter values no family could use
    pub fn validate(&self) -> Result<()> {
        match self.family {
            ModelFamily::GradientBoosting => self.boosting_params().map(|_| ()),
            ModelFamily::RandomForest => self.forest_params(1).map(|_| ()),
            ModelFamily::LogisticRegression => self.logistic_params().map(|_| ()),
        }?;
        self.balanced(false).map(|_| ())
    }

    /// Fit on an encoded matrix
    pub fn fit(&self, x: ArrayView2<f64>, y: &[f64]) -> Result<FittedEstimator> {
        if x.nrows() != y.len() {
            return Err(MlError::DimensionMismatch {
                expected: y.len(),
                actual: x.nrows(),
            });
        }
        if y.is_empty() {
            return Err(MlError::InsufficientData { required: 1, actual: 0 });
        }
        let width = x.ncols();

        let fitted = match (self.family, self.task) {
            (ModelFamily::GradientBoosting, task) => {
                let loss = match task {
                    Task::Classification => BoostingLoss::LogLoss,
                    Task::Regression => BoostingLoss::SquaredError,
                };
                let weights = vec![1.0; y.len()];
                FittedEstimator::Boosted(BoostedTrees::fit(
                    x,
                    y,
                    &weights,
                    loss,
                    &self.boosting_params()?,
                    self.random_state,
                ))
            }
            (ModelFamily::RandomForest, task) => {
                let weights = match task {
                    Task::Classification => class_weights(y, self.balanced(true)?),
                    Task::Regression => vec![1.0; y.len()],
                };
                FittedEstimator::Forest(RandomForest::fit(
                    x,
                    y,
                    &weights,
                    &self.forest_params(width)?,
                    self.random_state,
                    self.workers(),
                )?)
            }
            (ModelFamily::LogisticRegression, Task::Classification) => {
                let weights = class_weights(y, self.balanced(true)?);
                FittedEstimator::Logistic(LogisticModel::fit(
                    x,
                    ArrayView1::from(y),
                    ArrayView1::from(&weights),
                    &self.logistic_params()?,
                ))
            }
            (ModelFamily::LogisticRegression, Task::Regression) => {
                return Err(MlError::Config(
                    "logistic regression cannot fit a regression target".to_string(),
                ))
            }
        };
        Ok(fitted)
    }
}

/// Per-row weights; balanced weights are `n / (2 * n_class)`
fn class_weights(y: &[f64], balanced: bool) -> Vec<f64> {
    if !balanced {
        return vec![1.0; y.len()];
    }
    let n = y.len() as f64;
    let positives = y.iter().filter(|v| **v > 0.5).count() as f64;
    let negatives = n - positives;
    y.iter()
        .map(|v| {
            let count = if *v > 0.5 { positives } else { negatives };
            if count > 0.0 {
                n / (2.0 * count)
            } else {
                1.0
            }
        })
        .collect()
}

/// A trained model of one family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedEstimator {
    Boosted(BoostedTrees),
    Forest(RandomForest),
    Logistic(LogisticModel),
}

impl FittedEstimator {
    /// Classifier probability of the positive class, or regression value
    pub fn score_row(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            FittedEstimator::Boosted(m) => m.predict_row(row),
            FittedEstimator::Forest(m) => m.predict_row(row),
            FittedEstimator::Logistic(m) => m.predict_proba_row(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use serde_json::json;

    fn spec(family: ModelFamily, task: Task, params: Value) -> EstimatorSpec {
        EstimatorSpec {
            family,
            task,
            params: params.as_object().cloned().unwrap_or_default(),
            n_jobs: 1,
            random_state: 42,
        }
    }

    #[test]
    fn test_resolution_table() {
        use FamilyResolution::*;
        assert_eq!(
            FamilyResolution::resolve("gradient_boosting", Task::Classification),
            Native(ModelFamily::GradientBoosting)
        );
        assert_eq!(
            FamilyResolution::resolve("Random_Forest", Task::Regression),
            Native(ModelFamily::RandomForest)
        );
        assert_eq!(
            FamilyResolution::resolve("logistic_regression", Task::Classification),
            Native(ModelFamily::LogisticRegression)
        );

        for name in ["xgboost", "lightgbm", "svm"] {
            let resolved = FamilyResolution::resolve(name, Task::Classification);
            assert!(matches!(resolved, Fallback { .. }), "{}", name);
            assert_eq!(resolved.family(), ModelFamily::GradientBoosting);
        }
        let resolved = FamilyResolution::resolve("logistic_regression", Task::Regression);
        assert_eq!(resolved.family(), ModelFamily::GradientBoosting);
    }

    #[test]
    fn test_probability_capability() {
        assert!(spec(ModelFamily::RandomForest, Task::Classification, json!({})).has_probabilities());
        assert!(!spec(ModelFamily::GradientBoosting, Task::Regression, json!({})).has_probabilities());
    }

    #[test]
    fn test_params_parsed_with_defaults() {
        let s = spec(
            ModelFamily::GradientBoosting,
            Task::Classification,
            json!({"n_estimators": 7, "max_depth": 2, "learning_rate": 0.3}),
        );
        let params = s.boosting_params().unwrap();
        assert_eq!(params.n_estimators, 7);
        assert_eq!(params.tree.max_depth, Some(2));
        assert_eq!(params.learning_rate, 0.3);
        assert_eq!(params.subsample, 1.0);

        let forest = spec(ModelFamily::RandomForest, Task::Classification, json!({"max_depth": null}));
        let params = forest.forest_params(9).unwrap();
        assert_eq!(params.n_estimators, 300);
        assert_eq!(params.tree.max_depth, None);
        assert_eq!(params.tree.max_features, Some(3));
    }

    #[test]
    fn test_bad_params_rejected() {
        let s = spec(ModelFamily::GradientBoosting, Task::Classification, json!({"n_estimators": "many"}));
        assert!(matches!(s.validate(), Err(MlError::Config(_))));
        let s = spec(ModelFamily::RandomForest, Task::Classification, json!({"class_weight": "weird"}));
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_balanced_class_weights() {
        let w = class_weights(&[1.0, 0.0, 0.0, 0.0], true);
        assert_eq!(w, vec![2.0, 2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0]);
        assert_eq!(class_weights(&[1.0, 0.0], false), vec![1.0, 1.0]);
    }

    #[test]
    fn test_fit_rejects_empty_and_ragged_input() {
        let s = spec(ModelFamily::GradientBoosting, Task::Regression, json!({}));
        let empty = Array2::<f64>::zeros((0, 1));
        assert!(matches!(s.fit(empty.view(), &[]), Err(MlError::InsufficientData { .. })));
        assert!(matches!(
            s.fit(array![[1.0]].view(), &[1.0, 2.0]),
            Err(MlError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_each_family_fits() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64 / 10.0 - 1.5);
        let y: Vec<f64> = (0..30).map(|i| if i >= 15 { 1.0 } else { 0.0 }).collect();
        for family in [ModelFamily::GradientBoosting, ModelFamily::RandomForest, ModelFamily::LogisticRegression] {
            let fitted = spec(family, Task::Classification, json!({"n_estimators": 20}))
                .fit(x.view(), &y)
                .unwrap();
            assert!(fitted.score_row(array![1.4].view()) > 0.5, "{}", family);
            assert!(fitted.score_row(array![-1.4].view()) < 0.5, "{}", family);
        }
    }
}
