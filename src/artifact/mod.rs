//! Run artifacts and the model registry
//!
//! A successful run writes:
//! - `<output_root>/<run_id>/model.json`, `metadata.json` and, when a
//!   holdout existed, `holdout_predictions.csv`
//! - the same files mirrored into `<output_root>/latest/`
//! - `<output_root>/registry.json`, upserted by run id with the run active
//! - `<output_root>/latest.txt` holding the run id


use crate::config::{ArtifactFormat, TrainingConfig};
use crate::error::{MlError, Result};
use crate::training::TrainingReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const METADATA_FILE: &str = "metadata.json";
pub const HOLDOUT_PREDICTIONS_FILE: &str = "holdout_predictions.csv";
pub const REGISTRY_FILE: &str = "registry.json";
pub const LATEST_POINTER_FILE: &str = "latest.txt";
pub const LATEST_DIR: &str = "latest";

/// Where a run's files ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub run_dir: PathBuf,
    pub model: PathBuf,
    pub metadata: PathBuf,
    pub holdout_predictions: Option<PathBuf>,
    pub latest_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub path: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub experiment: String,
    #[serde(default)]
    pub metrics: Value,
}

/// `registry.json`: every registered run plus the active one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub active: Option<String>,
    #[serde(default)]
    pub models: Vec<RegistryEntry>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MlError::ArtifactNotFound(path.to_path_buf()));
        }
        let body = fs::read(path).map_err(|e| MlError::io(path, e))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Existing registry, or an empty one if absent or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(MlError::ArtifactNotFound(_)) => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Registry unreadable, starting a new one");
                Self::default()
            }
        }
    }

    /// Replace the entry with the same id (or append) and make it active
    pub fn upsert(&mut self, entry: RegistryEntry) {
        self.active = Some(entry.id.clone());
        match self.models.iter_mut().find(|m| m.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.models.push(entry),
        }
    }

    pub fn active_entry(&self) -> Option<&RegistryEntry> {
        let active = self.active.as_deref()?;
        self.models.iter().find(|m| m.id == active)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Persists a [`TrainingReport`] under the configured output root
pub struct ArtifactWriter<'a> {
    config: &'a TrainingConfig,
    format: ArtifactFormat,
}

impl<'a> ArtifactWriter<'a> {
    pub fn new(config: &'a TrainingConfig, format: ArtifactFormat) -> Self {
        Self { config, format }
    }

    pub fn write(&self, report: &TrainingReport) -> Result<ArtifactPaths> {
        let root = &self.config.output_root;
        let run_dir = root.join(&report.run_id);
        let latest_dir = root.join(LATEST_DIR);
        let model_name = self.format.model_file_name();

        self.write_run_files(&run_dir, report)?;

        let staging = root.join(format!(".{}.{}", LATEST_DIR, report.run_id));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| MlError::io(&staging, e))?;
        }
        self.write_run_files(&staging, report)?;
        swap_dir(&staging, &latest_dir)?;

        let model = run_dir.join(model_name);
        let registered = fs::canonicalize(&model).map_err(|e| MlError::io(&model, e))?;
        let mut registry = Registry::load_or_default(&root.join(REGISTRY_FILE));
        registry.upsert(RegistryEntry {
            id: report.run_id.clone(),
            path: registered.display().to_string(),
            model: report.family().to_string(),
            created_at: report.created_at,
            experiment: self.config.experiment_name.clone(),
            metrics: json!({
                "cv": report.cv.summary,
                "holdout": report.holdout,
            }),
        });
        registry.save(&root.join(REGISTRY_FILE))?;

        let pointer = root.join(LATEST_POINTER_FILE);
        fs::write(&pointer, &report.run_id).map_err(|e| MlError::io(&pointer, e))?;

        info!(
            run_id = %report.run_id,
            dir = %run_dir.display(),
            models = registry.models.len(),
            "Artifacts written"
        );
        Ok(ArtifactPaths {
            holdout_predictions: (!report.holdout_predictions.is_empty())
                .then(|| run_dir.join(HOLDOUT_PREDICTIONS_FILE)),
            metadata: run_dir.join(METADATA_FILE),
            model,
            run_dir,
            latest_dir,
        })
    }

    fn write_run_files(&self, dir: &Path, report: &TrainingReport) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| MlError::io(dir, e))?;
        report.pipeline.save(&dir.join(self.format.model_file_name()))?;
        write_json(&dir.join(METADATA_FILE), &self.metadata(report))?;
        if !report.holdout_predictions.is_empty() {
            write_holdout_predictions(&dir.join(HOLDOUT_PREDICTIONS_FILE), report)?;
        }
        Ok(())
    }

    /// Metadata document served back by the inference service
    pub fn metadata(&self, report: &TrainingReport) -> Value {
        let meta = &report.meta;
        json!({
            "run_id": report.run_id,
            "created_at": report.created_at,
            "task": self.config.task,
            "model_type": self.config.model_type,
            "resolved_family": report.family(),
            "dataset": report.dataset,
            "cv": report.cv,
            "holdout": report.holdout,
            "features": {
                "all": meta.feature_columns,
                "numeric": meta.numeric_columns,
                "categorical": meta.categorical_columns,
            },
            "target": meta.target,
            "time_column": meta.time_column,
            "feature_importance": report.feature_importance,
            "config": self.config,
        })
    }
}

/// Move a fully written `staging` directory into place at `target`.
///
/// The old `target` is renamed aside first and removed afterwards, so
/// `target` never holds a partially written file set.
fn swap_dir(staging: &Path, target: &Path) -> Result<()> {
    let mut retired = staging.as_os_str().to_owned();
    retired.push(".old");
    let retired = PathBuf::from(retired);
    if target.exists() {
        if retired.exists() {
            fs::remove_dir_all(&retired).map_err(|e| MlError::io(&retired, e))?;
        }
        fs::rename(target, &retired).map_err(|e| MlError::io(target, e))?;
    }
    fs::rename(staging, target).map_err(|e| MlError::io(staging, e))?;
    if retired.exists() {
        fs::remove_dir_all(&retired).map_err(|e| MlError::io(&retired, e))?;
    }
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).map_err(|e| MlError::io(path, e))
}

fn write_holdout_predictions(path: &Path, report: &TrainingReport) -> Result<()> {
    let with_prob = report.holdout_predictions.iter().any(|p| p.y_prob.is_some());
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["timestamp", "y_true", "y_pred"];
    if with_prob {
        header.push("y_prob");
    }
    writer.write_record(&header)?;

    for p in &report.holdout_predictions {
        let mut record = vec![p.timestamp.to_rfc3339(), p.y_true.to_string(), p.y_pred.to_string()];
        if with_prob {
            record.push(p.y_prob.map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer.flush().map_err(|e| MlError::io(path, e))?;
    Ok(())
}
