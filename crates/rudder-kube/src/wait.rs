//! Readiness waits
//!
//! A wait runs as its own task on the orchestrator's [`TaskTracker`]. The
//! caller's [`CancellationToken`] ends the foreground call promptly, but the
//! task itself runs on until the client's wait returns (bounded by the wait
//! timeout). Tracked tasks are what [`crate::Orchestrator::background_tasks`]
//! counts.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::client::ResourceClient;
use crate::error::{KubeError, Result};
use crate::manifest::Resource;

/// How readiness is determined after apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitStrategy {
    /// Do not wait
    #[default]
    None,
    /// Poll object status at a fixed interval
    #[serde(alias = "legacy")]
    LegacyPoll,
    /// Watch objects and react to status events
    #[serde(alias = "watcher")]
    StatusWatch,
}

impl WaitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStrategy::None => "none",
            WaitStrategy::LegacyPoll => "legacy-poll",
            WaitStrategy::StatusWatch => "status-watch",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, WaitStrategy::None)
    }
}

impl std::fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitStrategy {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" | "false" => Ok(WaitStrategy::None),
            "legacy" | "legacy-poll" => Ok(WaitStrategy::LegacyPoll),
            "watcher" | "status-watch" | "true" => Ok(WaitStrategy::StatusWatch),
            other => Err(KubeError::InvalidConfig(format!(
                "unknown wait strategy '{}' (expected none, legacy or watcher)",
                other
            ))),
        }
    }
}

/// Runs readiness waits as tracked, cancellable units of work
#[derive(Debug, Clone)]
pub struct WaitCoordinator {
    tracker: TaskTracker,
}

impl WaitCoordinator {
    pub fn new(tracker: TaskTracker) -> Self {
        Self { tracker }
    }

    /// Tasks still running on the tracker
    pub fn background_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for `resources` with the given strategy
    ///
    /// Returns [`KubeError::Cancelled`] as soon as `cancel` fires. The wait
    /// task is left to finish on its own.
    pub async fn wait(
        &self,
        client: Arc<dyn ResourceClient>,
        resources: Vec<Resource>,
        strategy: WaitStrategy,
        timeout: Duration,
        wait_for_jobs: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if strategy.is_none() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(KubeError::Cancelled);
        }

        tracing::debug!(%strategy, ?timeout, wait_for_jobs, "waiting for resources");
        let handle = self.tracker.spawn(async move {
            client
                .wait(&resources, strategy, timeout, wait_for_jobs)
                .await
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("wait cancelled by caller");
                Err(KubeError::Cancelled)
            }
            joined = handle => joined
                .map_err(|e| KubeError::WaitFailed(format!("wait task failed: {}", e)))?,
        }
    }
}
