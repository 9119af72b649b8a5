//! Orchestrator configuration
//!
//! Loaded once and injected into the [`crate::Orchestrator`]; nothing reads
//! process state after construction.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::annotations::parse_duration;
use crate::error::{KubeError, Result};
use crate::storage::CompressionMethod;
use crate::wait::WaitStrategy;

/// Settings shared by every operation of an orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Namespace used when an operation does not name one
    pub namespace: String,

    /// Versions kept per release; 0 keeps all
    pub max_history: u32,

    /// Default timeout for hooks and waits
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Default wait strategy
    pub wait_strategy: WaitStrategy,

    /// Never contact the cluster (implies client dry-run)
    pub client_only: bool,

    /// Platform version assumed in client-only mode
    pub kube_version: Option<String>,

    /// Compression of stored records
    pub compression: CompressionMethod,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            max_history: 10,
            timeout: Duration::from_secs(300),
            wait_strategy: WaitStrategy::None,
            client_only: false,
            kube_version: None,
            compression: CompressionMethod::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a YAML file; missing keys take their defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&content).map_err(|e| {
            KubeError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Defaults overlaid with `RUDDER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay variables read through `lookup`
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(namespace) = lookup("RUDDER_NAMESPACE").filter(|s| !s.is_empty()) {
            self.namespace = namespace;
        }
        if let Some(max) = lookup("RUDDER_MAX_HISTORY") {
            self.max_history = max.trim().parse().map_err(|_| {
                KubeError::InvalidConfig(format!("RUDDER_MAX_HISTORY: not a number: {}", max))
            })?;
        }
        if let Some(timeout) = lookup("RUDDER_TIMEOUT") {
            self.timeout = parse_duration(&timeout).ok_or_else(|| {
                KubeError::InvalidConfig(format!("RUDDER_TIMEOUT: invalid duration: {}", timeout))
            })?;
        }
        if let Some(wait) = lookup("RUDDER_WAIT") {
            self.wait_strategy = wait.parse()?;
        }
        Ok(self)
    }
}
