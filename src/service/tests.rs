//! Tests for the model cache and request handlers

use super::*;
use crate::artifact::{ArtifactPaths, ArtifactWriter, METADATA_FILE};
use crate::config::{ArtifactFormat, Task, TrainingConfig};
use crate::features::{FeatureMeta, FeatureSet};
use crate::training::Trainer;
use axum::http::StatusCode;
use chrono::{Duration, TimeZone, Utc};
use std::fs;
use std::time::{Duration as StdDuration, SystemTime};
use tempfile::TempDir;

fn trained_artifact() -> (TempDir, ArtifactPaths) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = TrainingConfig {
        task: Task::Classification,
        output_root: dir.path().to_path_buf(),
        cv_splits: 2,
        validation_holdout_days: 2,
        importance_repeats: 1,
        ..Default::default()
    };
    config.model_params.insert("n_estimators".into(), 10.into());

    let rows = 90;
    let start = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    let spread: Vec<f64> = (0..rows).map(|i| ((i * 13) % 30) as f64).collect();
    let mut frame = FeatureFrame::new(rows);
    frame.insert_numeric("spreadMid", spread.iter().map(|v| Some(*v)).collect()).unwrap();
    frame
        .insert_categorical(
            "token",
            (0..rows).map(|i| Some(if i % 2 == 0 { "eth" } else { "bnb" }.to_string())).collect(),
        )
        .unwrap();
    let features = FeatureSet {
        features: frame,
        target: spread.iter().map(|v| if *v >= 15.0 { 1.0 } else { 0.0 }).collect(),
        meta: FeatureMeta {
            feature_columns: vec!["spreadMid".into(), "token".into()],
            numeric_columns: vec!["spreadMid".into()],
            categorical_columns: vec!["token".into()],
            target: "label_class".into(),
            time_column: "trade_ts".into(),
            timestamps: (0..rows).map(|i| start + Duration::hours(i as i64 * 2)).collect(),
        },
    };

    let report = Trainer::new(&config).train(features, start + Duration::days(30)).unwrap();
    let paths = ArtifactWriter::new(&config, ArtifactFormat::Json).write(&report).unwrap();
    (dir, paths)
}

fn state_for(paths: &ArtifactPaths) -> Arc<ServiceState> {
    Arc::new(ServiceState::new(paths.model.clone()))
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_cache_reuses_unchanged_artifact() {
    let (_dir, paths) = trained_artifact();
    let cache = ModelCache::new();

    let first = cache.get(&paths.model).unwrap();
    let second = cache.get(&paths.model).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_cache_reloads_after_modification() {
    let (_dir, paths) = trained_artifact();
    let cache = ModelCache::new();
    let first = cache.get(&paths.model).unwrap();

    let file = fs::File::options().write(true).open(&paths.model).unwrap();
    file.set_modified(SystemTime::now() + StdDuration::from_secs(60)).unwrap();
    drop(file);

    let reloaded = cache.get(&paths.model).unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(cache.len(), 1);
    assert!(Arc::ptr_eq(&reloaded, &cache.get(&paths.model).unwrap()));
}

#[test]
fn test_failed_loads_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ModelCache::new();

    let missing = dir.path().join("model.json");
    assert!(matches!(cache.get(&missing), Err(MlError::ArtifactNotFound(_))));

    fs::write(&missing, "{ broken").unwrap();
    assert!(cache.get(&missing).is_err());
    assert!(cache.is_empty());
}

#[test]
fn test_metadata_loaded_alongside_model() {
    let (_dir, paths) = trained_artifact();
    let model = ModelCache::new().get(&paths.model).unwrap();
    assert_eq!(
        model.feature_order(),
        Some(vec!["spreadMid".to_string(), "token".to_string()])
    );
    assert!(model.metadata["run_id"].is_string());
}

#[tokio::test]
async fn test_health() {
    let Json(body) = health_check().await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test(flavor = "current_thread")]
async fn test_concurrent_loads_share_one_entry() {
    let (_dir, paths) = trained_artifact();
    let state = state_for(&paths);

    let (a, b) = tokio::join!(state.load(None), state.load(None));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.path, b.path);
    assert_eq!(state.cache.len(), 1);

    let explicit = paths.model.display().to_string();
    let again = state.load(Some(explicit.as_str())).await.unwrap();
    assert!(Arc::ptr_eq(&again, &state.load(None).await.unwrap()));
}

#[tokio::test]
async fn test_predict_fills_missing_columns() {
    let (_dir, paths) = trained_artifact();
    let state = state_for(&paths);
    let request = PredictRequest {
        payloads: vec![
            payload(json!({"spreadMid": 28.0, "token": "eth"})),
            payload(json!({"spreadMid": "2"})),
            payload(json!({"unrelated": true})),
        ],
        model_path: None,
        include_probabilities: true,
    };

    let Json(body) = predict(State(state), Json(request)).await.unwrap();
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 3);
    assert_eq!(predictions[0], 1.0);
    assert_eq!(predictions[1], 0.0);

    let probabilities = body["probabilities"].as_array().unwrap();
    assert_eq!(probabilities.len(), 3);
    let row = probabilities[0].as_array().unwrap();
    assert!((row[0].as_f64().unwrap() + row[1].as_f64().unwrap() - 1.0).abs() < 1e-9);

    assert_eq!(body["feature_order"], json!(["spreadMid", "token"]));
    assert_eq!(body["config"]["task"], "classification");
}

#[tokio::test]
async fn test_predict_without_probabilities() {
    let (_dir, paths) = trained_artifact();
    let request = PredictRequest {
        payloads: vec![payload(json!({"spreadMid": 1.0}))],
        model_path: Some(paths.model.display().to_string()),
        include_probabilities: false,
    };
    let Json(body) = predict(State(state_for(&paths)), Json(request)).await.unwrap();
    assert!(body.get("probabilities").is_none());
}

#[tokio::test]
async fn test_missing_artifact_is_not_found() {
    let (dir, paths) = trained_artifact();
    let request = PredictRequest {
        payloads: vec![],
        model_path: Some(dir.path().join("nope/model.json").display().to_string()),
        include_probabilities: true,
    };
    let err = predict(State(state_for(&paths)), Json(request)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metadata_without_features_is_server_error() {
    let (_dir, paths) = trained_artifact();
    fs::write(paths.run_dir.join(METADATA_FILE), r#"{"run_id": "x"}"#).unwrap();
    let request = PredictRequest {
        payloads: vec![payload(json!({"spreadMid": 1.0}))],
        model_path: Some(paths.model.display().to_string()),
        include_probabilities: true,
    };
    let err = predict(State(state_for(&paths)), Json(request)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_explain_returns_top_k() {
    let (_dir, paths) = trained_artifact();
    let request = ExplainRequest {
        model_path: None,
        top_k: 1,
    };
    let Json(body) = explain(State(state_for(&paths)), Json(request)).await.unwrap();
    let items = body["feature_importance"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["feature"], "spreadMid");

    let request = ExplainRequest {
        model_path: None,
        top_k: 0,
    };
    let Json(body) = explain(State(state_for(&paths)), Json(request)).await.unwrap();
    assert_eq!(body["feature_importance"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_explain_without_importance_is_not_found() {
    let (_dir, paths) = trained_artifact();
    fs::write(paths.run_dir.join(METADATA_FILE), r#"{"features": {"all": ["spreadMid"]}}"#).unwrap();
    let request = ExplainRequest {
        model_path: Some(paths.model.display().to_string()),
        top_k: 5,
    };
    let err = explain(State(state_for(&paths)), Json(request)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metadata_endpoint() {
    let (_dir, paths) = trained_artifact();
    let query = MetadataQuery {
        model_path: Some(paths.latest_dir.join("model.json").display().to_string()),
    };
    let Json(body) = metadata(State(state_for(&paths)), Query(query)).await.unwrap();
    assert_eq!(body["features"]["categorical"], json!(["token"]));
}

#[test]
fn test_request_defaults() {
    let request: PredictRequest = serde_json::from_value(json!({"payloads": []})).unwrap();
    assert!(request.include_probabilities);
    assert!(request.model_path.is_none());
    let request: ExplainRequest = serde_json::from_value(json!({})).unwrap();
    assert_eq!(request.top_k, 15);
}

#[test]
fn test_router_builds() {
    let _router = create_router(Arc::new(ServiceState::new(PathBuf::from("models/latest/model.json"))));
}
