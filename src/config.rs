//! Loader configuration.

use crate::error::{ResourceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Loader and scheduler settings.
///
/// - `resource_dir`: directory holding `<guid>.<metadata_extension>` files
/// - `worker_threads`: load workers; 0 means loads are polled by hand
/// - `io_threads`: background readers; 0 means reads happen inline
/// - `backoff_limit`: idle polls before a worker parks, and idle passes
///   before `run_until_idle` gives up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub resource_dir: PathBuf,
    pub metadata_extension: String,
    pub worker_threads: usize,
    pub io_threads: usize,
    pub backoff_limit: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .clamp(1, 4);
        Self {
            resource_dir: PathBuf::from("resources"),
            metadata_extension: String::from("rbcmt"),
            worker_threads: workers,
            io_threads: 1,
            backoff_limit: 64,
        }
    }
}

impl LoaderConfig {
    /// Deterministic single-threaded setup: manual polling, inline reads
    pub fn manual(resource_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            worker_threads: 0,
            io_threads: 0,
            ..Self::default()
        }
    }

    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = dir.into();
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ResourceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ResourceError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let extension = self.metadata_extension.as_str();
        if extension.is_empty() || extension.contains(['.', '/', '\\']) {
            return Err(ResourceError::Config(format!(
                "invalid metadata extension {extension:?}"
            )));
        }
        if self.backoff_limit == 0 {
            return Err(ResourceError::Config("backoff_limit must be at least 1".into()));
        }
        Ok(())
    }
}
