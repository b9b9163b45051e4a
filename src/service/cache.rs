//! Loaded-model cache keyed by artifact path

use crate::artifact::METADATA_FILE;
use crate::error::{MlError, Result};
use crate::ml::ModelPipeline;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

/// A fitted pipeline together with the metadata written next to it
#[derive(Debug)]
pub struct LoadedModel {
    pub path: PathBuf,
    pub pipeline: ModelPipeline,
    /// Contents of the sibling `metadata.json`, or an empty object
    pub metadata: Value,
}

impl LoadedModel {
    /// Training feature order from the metadata document
    pub fn feature_order(&self) -> Option<Vec<String>> {
        let all = self.metadata.get("features")?.get("all")?.as_array()?;
        let names: Vec<String> = all.iter().filter_map(|v| v.as_str().map(String::from)).collect();
        (!names.is_empty()).then_some(names)
    }
}

struct CacheEntry {
    model: Arc<LoadedModel>,
    modified: SystemTime,
}

/// Process-wide model cache
///
/// Entries are reused only while the file's modification time is unchanged.
/// The lock is held across the check and the reload, so concurrent callers
/// never see a half-replaced entry.
#[derive(Default)]
pub struct ModelCache {
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Return the cached model for `path`, loading it if absent or stale
    pub fn get(&self, path: &Path) -> Result<Arc<LoadedModel>> {
        let resolved = fs::canonicalize(path).map_err(|_| MlError::ArtifactNotFound(path.to_path_buf()))?;
        let modified = fs::metadata(&resolved)
            .and_then(|m| m.modified())
            .map_err(|e| MlError::io(&resolved, e))?;

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&resolved) {
            if entry.modified == modified {
                return Ok(Arc::clone(&entry.model));
            }
        }

        let model = Arc::new(load_model(&resolved)?);
        info!(path = %resolved.display(), "Model loaded");
        entries.insert(
            resolved,
            CacheEntry {
                model: Arc::clone(&model),
                modified,
            },
        );
        Ok(model)
    }
}

fn load_model(path: &Path) -> Result<LoadedModel> {
    let pipeline = ModelPipeline::load(path)?;
    let metadata_path = path.with_file_name(METADATA_FILE);
    let metadata = if metadata_path.exists() {
        let body = fs::read(&metadata_path).map_err(|e| MlError::io(&metadata_path, e))?;
        serde_json::from_slice(&body)?
    } else {
        Value::Object(Map::new())
    };
    Ok(LoadedModel {
        path: path.to_path_buf(),
        pipeline,
        metadata,
    })
}
