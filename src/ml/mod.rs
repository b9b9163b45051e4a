//! Model fitting and evaluation
//!
//! Provides the estimator side of a training run:
//! - Column preprocessing (median/standardise, most-frequent/one-hot)
//! - Tree ensembles and logistic regression behind one family lookup
//! - A serialisable pipeline bundling preprocessing with the estimator
//! - Classification and regression metrics with explicit outcomes
//! - Permutation feature importance

pub mod ensemble;
pub mod estimator;
pub mod importance;
pub mod linear;
pub mod metrics;
pub mod pipeline;
pub mod preprocess;
pub mod tree;

#[cfg(test)]
mod tests;

pub use estimator::{EstimatorSpec, FamilyResolution, FittedEstimator, ModelFamily};
pub use importance::{permutation_importance, FeatureImportance, ImportanceParams};
pub use metrics::{evaluate, summarize, to_metric_map, MetricMap, MetricOutcome, MetricSummary};
pub use pipeline::ModelPipeline;
pub use preprocess::Preprocessor;
