//! Inference HTTP service
//!
//! Serves trained artifacts over a small JSON API:
//! - `GET /health`
//! - `POST /predict` scores feature dictionaries with the artifact's column order
//! - `POST /explain` returns the stored importance ranking
//! - `GET /metadata` returns the artifact's metadata document

pub mod cache;

#[cfg(test)]
mod tests;

pub use cache::{LoadedModel, ModelCache};

use crate::config::ServiceConfig;
use crate::error::MlError;
use crate::features::FeatureFrame;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// State shared across handlers
pub struct ServiceState {
    pub cache: Arc<ModelCache>,
    pub default_model_path: PathBuf,
}

impl ServiceState {
    pub fn new(default_model_path: PathBuf) -> Self {
        Self {
            cache: Arc::new(ModelCache::new()),
            default_model_path,
        }
    }

    /// Requested or default artifact, relative paths taken from the working directory.
    ///
    /// The cache check and any reload run on the blocking pool.
    async fn load(&self, model_path: Option<&str>) -> Result<Arc<LoadedModel>, ApiError> {
        let candidate = model_path.map(PathBuf::from).unwrap_or_else(|| self.default_model_path.clone());
        let candidate = if candidate.is_absolute() {
            candidate
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&candidate))
                .unwrap_or(candidate)
        };
        let cache = Arc::clone(&self.cache);
        let model = tokio::task::spawn_blocking(move || cache.get(&candidate))
            .await
            .map_err(|e| MlError::Internal(format!("model load task failed: {}", e)))??;
        Ok(model)
    }
}

/// JSON error body with an HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<MlError> for ApiError {
    fn from(err: MlError) -> Self {
        let status = match &err {
            MlError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            MlError::SchemaMismatch(_) | MlError::DimensionMismatch { .. } | MlError::NotFitted => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    15
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub payloads: Vec<Map<String, Value>>,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_true")]
    pub include_probabilities: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct MetadataQuery {
    pub model_path: Option<String>,
}

/// Health check
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Score feature dictionaries
pub async fn predict(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<Value>, ApiError> {
    let model = state.load(request.model_path.as_deref()).await?;
    let feature_order = model.feature_order().ok_or_else(|| {
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Model metadata missing feature definitions",
        )
    })?;

    let frame = payload_frame(&request.payloads, &feature_order, &model.pipeline.categorical_columns)?;
    let predictions = model
        .pipeline
        .predict(&frame)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Prediction failed: {}", e)))?;

    let mut response = Map::new();
    response.insert("predictions".into(), json!(predictions));

    if request.include_probabilities && model.pipeline.has_probabilities() {
        match model.pipeline.predict_proba(&frame) {
            Ok(Some(probs)) => {
                let rows: Vec<[f64; 2]> = probs.iter().map(|p| [1.0 - p, *p]).collect();
                response.insert("probabilities".into(), json!(rows));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Probability scoring failed");
                response.insert("probabilities_error".into(), json!(e.to_string()));
            }
        }
    }

    response.insert("feature_order".into(), json!(feature_order));
    response.insert(
        "config".into(),
        model.metadata.get("config").cloned().unwrap_or(Value::Null),
    );
    Ok(Json(Value::Object(response)))
}

/// Top features of the stored importance ranking
pub async fn explain(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<ExplainRequest>,
) -> Result<Json<Value>, ApiError> {
    let model = state.load(request.model_path.as_deref()).await?;
    let mut ranking: Vec<(String, f64)> = model
        .metadata
        .get("feature_importance")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let feature = item.get("feature")?.as_str()?;
                    let importance = item.get("importance")?.as_f64()?;
                    Some((feature.to_string(), importance))
                })
                .collect()
        })
        .unwrap_or_default();
    if ranking.is_empty() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Feature importance unavailable"));
    }

    ranking.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    ranking.truncate(request.top_k.max(1));
    let items: Vec<Value> = ranking
        .into_iter()
        .map(|(feature, importance)| json!({ "feature": feature, "importance": importance }))
        .collect();
    Ok(Json(json!({ "feature_importance": items })))
}

/// Metadata document of an artifact
pub async fn metadata(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<MetadataQuery>,
) -> Result<Json<Value>, ApiError> {
    let model = state.load(query.model_path.as_deref()).await?;
    Ok(Json(model.metadata.clone()))
}

/// Rebuild a feature table in training column order; absent keys become missing
fn payload_frame(
    payloads: &[Map<String, Value>],
    feature_order: &[String],
    categorical: &[String],
) -> Result<FeatureFrame, ApiError> {
    let mut frame = FeatureFrame::new(payloads.len());
    for column in feature_order {
        let cells = payloads.iter().map(|p| p.get(column).filter(|v| !v.is_null()));
        let inserted = if categorical.contains(column) {
            frame.insert_categorical(column.clone(), cells.map(|v| v.and_then(text_cell)).collect())
        } else {
            frame.insert_numeric(column.clone(), cells.map(|v| v.and_then(numeric_cell)).collect())
        };
        inserted?;
    }
    Ok(frame)
}

fn numeric_cell(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn text_cell(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Create service router
pub fn create_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/metadata", get(metadata))
        .with_state(state)
}

/// Start the inference service
pub async fn start_service(config: &ServiceConfig) -> anyhow::Result<()> {
    let state = Arc::new(ServiceState::new(config.default_model_path.clone()));
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Inference service starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
