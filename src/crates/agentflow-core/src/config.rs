//! YAML workflow configuration
//!
//! ```yaml
//! name: support-triage
//! max_iterations: 50
//! checkpoint:
//!   backend: file
//!   directory: ./checkpoints
//! ```

use crate::error::{Result, WorkflowError};
use crate::runner::DEFAULT_MAX_ITERATIONS;
use agentflow_checkpoint::{CheckpointStorage, FileCheckpointStorage, InMemoryCheckpointStorage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Bound on supersteps per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Checkpoint backend; no automatic checkpoints when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSettings {
    pub backend: CheckpointBackend,

    /// Required for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            checkpoint: None,
        }
    }
}

impl WorkflowConfig {
    /// Load and validate a configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(WorkflowError::Configuration(
                "max_iterations must be at least 1".into(),
            ));
        }
        if let Some(settings) = &self.checkpoint {
            if settings.backend == CheckpointBackend::File && settings.directory.is_none() {
                return Err(WorkflowError::Configuration(
                    "the file checkpoint backend requires a directory".into(),
                ));
            }
        }
        Ok(())
    }

    /// Storage for the configured backend.
    pub fn checkpoint_storage(&self) -> Option<Arc<dyn CheckpointStorage>> {
        let settings = self.checkpoint.as_ref()?;
        match (settings.backend, &settings.directory) {
            (CheckpointBackend::Memory, _) => Some(Arc::new(InMemoryCheckpointStorage::new())),
            (CheckpointBackend::File, Some(directory)) => {
                Some(Arc::new(FileCheckpointStorage::new(directory.clone())))
            }
            (CheckpointBackend::File, None) => {
                tracing::warn!("File checkpoint backend has no directory, checkpointing disabled");
                None
            }
        }
    }
}
