//! Pipeline-level tests for the ML module

use super::*;
use crate::config::Task;
use crate::error::MlError;
use crate::features::{FeatureFrame, FeatureMeta};
use serde_json::Map;

fn meta() -> FeatureMeta {
    FeatureMeta {
        feature_columns: vec!["signal".into(), "noise".into(), "token".into()],
        numeric_columns: vec!["noise".into(), "signal".into()],
        categorical_columns: vec!["token".into()],
        target: "label_class".into(),
        time_column: "trade_ts".into(),
        timestamps: Vec::new(),
    }
}

fn dataset(n: usize) -> (FeatureFrame, Vec<f64>) {
    let mut frame = FeatureFrame::new(n);
    let signal: Vec<Option<f64>> = (0..n)
        .map(|i| if i % 7 == 3 { None } else { Some(i as f64 / n as f64) })
        .collect();
    let noise: Vec<Option<f64>> = (0..n).map(|i| Some(((i * 31) % 11) as f64)).collect();
    let token: Vec<Option<String>> = (0..n)
        .map(|i| Some(if i % 2 == 0 { "eth" } else { "bnb" }.to_string()))
        .collect();
    let y: Vec<f64> = (0..n).map(|i| if i >= n / 2 { 1.0 } else { 0.0 }).collect();
    frame.insert_numeric("signal", signal).unwrap();
    frame.insert_numeric("noise", noise).unwrap();
    frame.insert_categorical("token", token).unwrap();
    (frame, y)
}

fn spec(family: ModelFamily, task: Task) -> EstimatorSpec {
    let mut params = Map::new();
    params.insert("n_estimators".into(), 30.into());
    EstimatorSpec {
        family,
        task,
        params,
        n_jobs: 2,
        random_state: 42,
    }
}

#[test]
fn test_unfitted_pipeline_refuses_to_predict() {
    let (frame, _) = dataset(10);
    let pipeline = ModelPipeline::new(spec(ModelFamily::GradientBoosting, Task::Classification), &meta());
    assert!(matches!(pipeline.predict(&frame), Err(MlError::NotFitted)));
}

#[test]
fn test_classifier_pipeline_predicts_labels_and_probabilities() {
    let (frame, y) = dataset(80);
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::RandomForest, Task::Classification), &meta());
    pipeline.fit(&frame, &y).unwrap();

    let labels = pipeline.predict(&frame).unwrap();
    assert!(labels.iter().all(|v| *v == 0.0 || *v == 1.0));
    let proba = pipeline.predict_proba(&frame).unwrap().unwrap();
    assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(metrics::accuracy(&y, &labels) > 0.9);
}

#[test]
fn test_regressor_has_no_probabilities() {
    let (frame, _) = dataset(40);
    let y: Vec<f64> = (0..40).map(|i| i as f64 * 0.5).collect();
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::GradientBoosting, Task::Regression), &meta());
    pipeline.fit(&frame, &y).unwrap();
    assert_eq!(pipeline.predict_proba(&frame).unwrap(), None);
    assert_eq!(pipeline.predict(&frame).unwrap().len(), 40);
}

#[test]
fn test_unfitted_clone_shares_no_state() {
    let (frame, y) = dataset(40);
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::GradientBoosting, Task::Classification), &meta());
    pipeline.fit(&frame, &y).unwrap();
    let fresh = pipeline.unfitted();
    assert!(pipeline.is_fitted());
    assert!(!fresh.is_fitted());
    assert_eq!(fresh.feature_columns, pipeline.feature_columns);
}

#[test]
fn test_missing_feature_column_is_schema_error() {
    let (frame, y) = dataset(40);
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::LogisticRegression, Task::Classification), &meta());
    pipeline.fit(&frame, &y).unwrap();

    let mut partial = FeatureFrame::new(1);
    partial.insert_numeric("signal", vec![Some(0.3)]).unwrap();
    assert!(matches!(pipeline.predict(&partial), Err(MlError::SchemaMismatch(_))));
}

#[test]
fn test_save_and_load_reproduce_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    let (frame, y) = dataset(60);
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::GradientBoosting, Task::Classification), &meta());

    assert!(matches!(pipeline.save(&path), Err(MlError::NotFitted)));
    pipeline.fit(&frame, &y).unwrap();
    pipeline.save(&path).unwrap();

    let loaded = ModelPipeline::load(&path).unwrap();
    assert_eq!(loaded.predict_proba(&frame).unwrap(), pipeline.predict_proba(&frame).unwrap());
    assert!(matches!(
        ModelPipeline::load(&dir.path().join("absent.json")),
        Err(MlError::ArtifactNotFound(_))
    ));
}

#[test]
fn test_permutation_importance_ranks_signal_first() {
    let (frame, y) = dataset(80);
    let mut pipeline = ModelPipeline::new(spec(ModelFamily::GradientBoosting, Task::Classification), &meta());
    pipeline.fit(&frame, &y).unwrap();

    let params = ImportanceParams {
        sample_size: 50,
        repeats: 3,
        seed: 42,
    };
    let ranking = permutation_importance(&pipeline, &frame, &y, params).unwrap();
    assert_eq!(ranking.len(), 3);
    assert_eq!(ranking[0].feature, "signal");
    assert!(ranking.windows(2).all(|w| w[0].importance.abs() >= w[1].importance.abs()));

    let again = permutation_importance(&pipeline, &frame, &y, params).unwrap();
    assert_eq!(ranking, again);
}
