//! Active model summary from the registry, plus a live service probe

use crate::artifact::{Registry, RegistryEntry, REGISTRY_FILE};
use crate::error::{MlError, Result};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStatus {
    pub active: Option<String>,
    pub registered: usize,
    pub active_entry: Option<RegistryEntry>,
}

impl RegistryStatus {
    /// Read `<output_root>/registry.json`
    pub fn read(output_root: &Path) -> Result<Self> {
        let registry = Registry::load(&output_root.join(REGISTRY_FILE))?;
        Ok(Self {
            active: registry.active.clone(),
            registered: registry.models.len(),
            active_entry: registry.active_entry().cloned(),
        })
    }

    /// Human-readable summary lines
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Active model: {}", self.active.as_deref().unwrap_or("none")),
            format!("Registered models: {}", self.registered),
        ];
        if let Some(entry) = &self.active_entry {
            lines.push(format!(" - Path: {}", entry.path));
            lines.push(format!(" - Created: {}", entry.created_at.to_rfc3339()));
            if !entry.metrics.is_null() {
                lines.push(format!(" - Metrics: {}", entry.metrics));
            }
        }
        lines
    }
}

/// HTTP probe of a running inference service
pub struct ServiceProbe {
    client: reqwest::Client,
    base_url: String,
}

impl ServiceProbe {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| MlError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET `endpoint`; an unreachable service or error status yields `None`
    pub async fn fetch(&self, endpoint: &str) -> Option<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(%url, error = %e, "Failed to reach service");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(%url, status = %response.status(), "Service returned an error");
            return None;
        }
        match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(%url, error = %e, "Service returned an unreadable body");
                None
            }
        }
    }
}
