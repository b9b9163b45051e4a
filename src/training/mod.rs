//! Training driver
//!
//! One run goes through these steps:
//! - load trades and context, build the feature matrix
//! - keep the most recent `max_training_rows` rows
//! - carve off the trailing holdout and cross-validate on the rest
//! - fit the final pipeline, score the holdout, rank features
//! - hand everything to the artifact writer


use crate::artifact::{ArtifactPaths, ArtifactWriter};
use crate::config::TrainingConfig;
use crate::data::{Dataset, DatasetLoader};
use crate::error::{MlError, Result};
use crate::features::{FeatureBuilder, FeatureMeta, FeatureSet};
use crate::ml::{
    evaluate, permutation_importance, summarize, to_metric_map, EstimatorSpec, FamilyResolution, FeatureImportance,
    ImportanceParams, MetricMap, MetricSummary, ModelFamily, ModelPipeline,
};
use crate::split::{holdout_split, time_splits};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Row counts and time bounds of the modelled data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CvReport {
    pub folds: Vec<MetricMap>,
    pub summary: BTreeMap<String, MetricSummary>,
}

/// One row of `holdout_predictions.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldoutPrediction {
    pub timestamp: DateTime<Utc>,
    pub y_true: f64,
    pub y_pred: f64,
    pub y_prob: Option<f64>,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub resolution: FamilyResolution,
    pub dataset: DatasetSummary,
    pub cv: CvReport,
    pub holdout: Option<MetricMap>,
    pub holdout_predictions: Vec<HoldoutPrediction>,
    pub feature_importance: Vec<FeatureImportance>,
    pub meta: FeatureMeta,
    pub pipeline: ModelPipeline,
}

impl TrainingReport {
    pub fn family(&self) -> ModelFamily {
        self.resolution.family()
    }
}

/// Runs cross-validation, final fit and evaluation for one configuration
pub struct Trainer<'a> {
    config: &'a TrainingConfig,
}

impl<'a> Trainer<'a> {
    pub fn new(config: &'a TrainingConfig) -> Self {
        Self { config }
    }

    /// Build features from a loaded dataset and train on them
    pub fn run(&self, dataset: &Dataset, now: DateTime<Utc>) -> Result<TrainingReport> {
        let features = FeatureBuilder::new(self.config).build(&dataset.trades, &dataset.context_by_server)?;
        self.train(features, now)
    }

    pub fn train(&self, features: FeatureSet, now: DateTime<Utc>) -> Result<TrainingReport> {
        let config = self.config;
        let features = self.limit_rows(features);
        if features.is_empty() {
            return Err(MlError::InsufficientData { required: 1, actual: 0 });
        }

        let resolution = FamilyResolution::resolve(&config.model_type, config.task);
        if let FamilyResolution::Fallback {
            requested,
            family,
            reason,
        } = &resolution
        {
            warn!(%requested, fallback = %family, %reason, "Model family unavailable, falling back");
        }
        let spec = EstimatorSpec::from_config(config, resolution.family());
        spec.validate()?;
        let template = ModelPipeline::new(spec, &features.meta);

        let split = holdout_split(&features.meta.timestamps, config.holdout_duration());
        let train_set = features.select_rows(&split.train);
        let holdout_set = features.select_rows(&split.holdout);
        info!(
            rows = features.len(),
            train_rows = train_set.len(),
            holdout_rows = holdout_set.len(),
            family = %resolution.family(),
            "Training split ready"
        );

        let cv = self.cross_validate(&template, &train_set)?;

        let mut pipeline = template.unfitted();
        pipeline.fit(&train_set.features, &train_set.target)?;
        info!("Final model fitted");

        let (holdout, holdout_predictions) = if holdout_set.is_empty() {
            (None, Vec::new())
        } else {
            let (metrics, predictions) = self.evaluate_holdout(&pipeline, &holdout_set)?;
            info!(metrics = ?metrics, "Holdout evaluation");
            (Some(metrics), predictions)
        };

        let feature_importance = self.feature_importance(&pipeline, &train_set);

        Ok(TrainingReport {
            run_id: config.run_id(now),
            created_at: now,
            resolution,
            dataset: DatasetSummary {
                rows: features.len(),
                train_rows: train_set.len(),
                holdout_rows: holdout_set.len(),
                start: features.meta.timestamps.first().copied(),
                end: features.meta.timestamps.last().copied(),
            },
            cv,
            holdout,
            holdout_predictions,
            feature_importance,
            meta: features.meta,
            pipeline,
        })
    }

    /// Keep the most recent rows; features are already chronological
    fn limit_rows(&self, features: FeatureSet) -> FeatureSet {
        match self.config.max_training_rows {
            Some(limit) if features.len() > limit => {
                info!(limit, rows = features.len(), "Keeping most recent rows");
                let rows: Vec<usize> = (features.len() - limit..features.len()).collect();
                features.select_rows(&rows)
            }
            _ => features,
        }
    }

    fn cross_validate(&self, template: &ModelPipeline, train: &FeatureSet) -> Result<CvReport> {
        let folds = time_splits(&train.meta.timestamps, self.config.cv_splits, self.config.cv_gap());
        if folds.is_empty() {
            warn!("Skipping cross-validation; insufficient splits");
            return Ok(CvReport::default());
        }

        let mut fold_metrics = Vec::with_capacity(folds.len());
        for (i, fold) in folds.iter().enumerate() {
            let fold_train = train.select_rows(&fold.train);
            let fold_val = train.select_rows(&fold.validation);

            let mut model = template.unfitted();
            model.fit(&fold_train.features, &fold_train.target)?;
            let y_pred = model.predict(&fold_val.features)?;
            let y_prob = model.predict_proba(&fold_val.features)?;

            let mut metrics = to_metric_map(evaluate(self.config.task, &fold_val.target, &y_pred, y_prob.as_deref()));
            info!(
                fold = i + 1,
                train_rows = fold_train.len(),
                validation_rows = fold_val.len(),
                metrics = ?metrics,
                "Fold evaluated"
            );
            metrics.insert("fold".to_string(), (i + 1) as f64);
            fold_metrics.push(metrics);
        }

        let summary = summarize(&fold_metrics);
        Ok(CvReport {
            folds: fold_metrics,
            summary,
        })
    }

    fn evaluate_holdout(&self, pipeline: &ModelPipeline, holdout: &FeatureSet) -> Result<(MetricMap, Vec<HoldoutPrediction>)> {
        let y_pred = pipeline.predict(&holdout.features)?;
        let y_prob = pipeline.predict_proba(&holdout.features)?;
        let metrics = to_metric_map(evaluate(self.config.task, &holdout.target, &y_pred, y_prob.as_deref()));

        let predictions = (0..holdout.len())
            .map(|i| HoldoutPrediction {
                timestamp: holdout.meta.timestamps[i],
                y_true: holdout.target[i],
                y_pred: y_pred[i],
                y_prob: y_prob.as_ref().map(|p| p[i]),
            })
            .collect();
        Ok((metrics, predictions))
    }

    /// Importance is best effort; a failure leaves the ranking empty
    fn feature_importance(&self, pipeline: &ModelPipeline, train: &FeatureSet) -> Vec<FeatureImportance> {
        let params = ImportanceParams {
            sample_size: self.config.importance_sample_size,
            repeats: self.config.importance_repeats,
            seed: self.config.random_state,
        };
        match permutation_importance(pipeline, &train.features, &train.target, params) {
            Ok(ranking) => ranking,
            Err(e) => {
                warn!(error = %e, "Permutation importance failed");
                Vec::new()
            }
        }
    }
}

/// Load, train and persist one run; returns where the artifacts went
pub fn run_training(config: &TrainingConfig) -> Result<(TrainingReport, ArtifactPaths)> {
    config.validate()?;
    let format = config.artifact_format()?;
    let dataset = DatasetLoader::new(config).load()?;
    if dataset.trades.is_empty() {
        warn!(root = %config.data_root.display(), "No trades loaded");
    }
    let report = Trainer::new(config).run(&dataset, Utc::now())?;
    let paths = ArtifactWriter::new(config, format).write(&report)?;
    Ok((report, paths))
}
