//! Configuration for training runs and the inference service
//!
//! Training options are read from an optional TOML file layered under
//! `TRADE_ML__*` environment variables; CLI flags override both.

use crate::error::{MlError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Learning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Classification,
    Regression,
}

impl std::str::FromStr for Task {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "classification" => Ok(Task::Classification),
            "regression" => Ok(Task::Regression),
            other => Err(MlError::Config(format!("unknown task '{}'", other))),
        }
    }
}

/// Serialization format of the fitted pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
}

impl ArtifactFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Ok(ArtifactFormat::Json),
            other => Err(MlError::UnknownFormat(other.to_string())),
        }
    }

    /// File name of the model inside a run directory
    pub fn model_file_name(&self) -> &'static str {
        match self {
            ArtifactFormat::Json => "model.json",
        }
    }
}

/// Options for one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_root: PathBuf,
    /// Server directories to load (all sub-directories when unset)
    pub servers: Option<Vec<String>>,
    /// Token filter applied after the union of all servers
    pub tokens: Option<Vec<String>>,
    pub task: Task,
    pub target_column: String,
    pub regression_target: String,
    pub classification_threshold: f64,
    pub tolerance_minutes: f64,
    /// Truncate every table to its first N rows
    pub row_limit: Option<usize>,
    pub model_type: String,
    pub model_params: serde_json::Map<String, serde_json::Value>,
    pub cv_splits: usize,
    pub cv_gap_minutes: f64,
    pub validation_holdout_days: i64,
    pub feature_windows_minutes: Vec<i64>,
    pub feature_windows_hours: Vec<i64>,
    pub imbalance_eps: f64,
    pub output_root: PathBuf,
    pub experiment_name: String,
    /// Worker count handed to the estimator (-1 = all cores)
    pub n_jobs: i32,
    pub random_state: u64,
    /// Keep only the most recent N rows before splitting
    pub max_training_rows: Option<usize>,
    pub importance_sample_size: usize,
    pub importance_repeats: usize,
    pub artifact_format: String,
    pub time_column: String,
    pub server_column: String,
    pub token_column: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data_exports"),
            servers: None,
            tokens: None,
            task: Task::Classification,
            target_column: "label_class".to_string(),
            regression_target: "label_regression".to_string(),
            classification_threshold: 0.0,
            tolerance_minutes: 2.0,
            row_limit: None,
            model_type: "gradient_boosting".to_string(),
            model_params: serde_json::Map::new(),
            cv_splits: 5,
            cv_gap_minutes: 5.0,
            validation_holdout_days: 14,
            feature_windows_minutes: vec![5, 15, 30, 60],
            feature_windows_hours: vec![4, 12, 24],
            imbalance_eps: 1e-6,
            output_root: PathBuf::from("models"),
            experiment_name: "ml-analysis".to_string(),
            n_jobs: -1,
            random_state: 42,
            max_training_rows: None,
            importance_sample_size: 5000,
            importance_repeats: 5,
            artifact_format: "json".to_string(),
            time_column: "trade_ts".to_string(),
            server_column: "serverId".to_string(),
            token_column: "token".to_string(),
        }
    }
}

impl TrainingConfig {
    /// Load from an optional TOML file plus `TRADE_ML__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TRADE_ML")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("servers")
                .with_list_parse_key("tokens")
                .with_list_parse_key("feature_windows_minutes")
                .with_list_parse_key("feature_windows_hours"),
        );

        let config: TrainingConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no run could succeed with
    pub fn validate(&self) -> Result<()> {
        ArtifactFormat::parse(&self.artifact_format)?;
        if self.imbalance_eps <= 0.0 {
            return Err(MlError::Config("imbalance_eps must be positive".to_string()));
        }
        if self.cv_gap_minutes < 0.0 {
            return Err(MlError::Config("cv_gap_minutes must not be negative".to_string()));
        }
        if let Some(bad) = self
            .feature_windows_minutes
            .iter()
            .chain(self.feature_windows_hours.iter())
            .find(|w| **w <= 0)
        {
            return Err(MlError::Config(format!("feature window {} must be positive", bad)));
        }
        Ok(())
    }

    /// Name of the label column the configured task trains on
    pub fn target(&self) -> &str {
        match self.task {
            Task::Classification => &self.target_column,
            Task::Regression => &self.regression_target,
        }
    }

    pub fn artifact_format(&self) -> Result<ArtifactFormat> {
        ArtifactFormat::parse(&self.artifact_format)
    }

    pub fn cv_gap(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.cv_gap_minutes * 60_000.0).round() as i64)
    }

    pub fn holdout_duration(&self) -> chrono::Duration {
        chrono::Duration::days(self.validation_holdout_days)
    }

    /// Run identifier `<experiment>-<UTC stamp>`
    pub fn run_id(&self, now: DateTime<Utc>) -> String {
        format!("{}-{}", self.experiment_name, now.format("%Y%m%d-%H%M%S"))
    }
}

/// Inference service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub default_model_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8100,
            default_model_path: PathBuf::from("models/latest/model.json"),
        }
    }
}

impl ServiceConfig {
    /// Read `ML_SERVICE_HOST`, `ML_SERVICE_PORT` and `MODEL_ARTIFACT`
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            host: std::env::var("ML_SERVICE_HOST").unwrap_or(defaults.host),
            port: std::env::var("ML_SERVICE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            default_model_path: std::env::var("MODEL_ARTIFACT")
                .map(PathBuf::from)
                .unwrap_or(defaults.default_model_path),
        }
    }
}
