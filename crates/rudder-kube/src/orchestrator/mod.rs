//! Release orchestrator
//!
//! Drives install, upgrade, rollback and uninstall of bundles. Each operation
//! validates its inputs, records a pending version, runs hooks around the
//! apply, waits for readiness and then records the outcome. Failures after
//! the pending record is written always leave a `failed` record behind,
//! unless atomic recovery removed or replaced it.
//!
//! The orchestrator owns no process state; everything it needs is injected
//! at construction.

mod install;
mod rollback;
mod uninstall;
mod upgrade;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rudder_core::{Bundle, Capabilities, KubeVersion, ReleaseStatus};
use rudder_engine::{Engine, RenderedBundle};
use tokio_util::task::TaskTracker;

use crate::client::ResourceClient;
use crate::config::OrchestratorConfig;
use crate::error::{KubeError, Result};
use crate::manifest::{Resource, ResourceKey};
use crate::ownership;
use crate::release::Release;
use crate::render::Renderer;
use crate::storage::{self, StorageDriver, SYSTEM_LABELS};
use crate::wait::{WaitCoordinator, WaitStrategy};

pub use uninstall::UninstallResponse;

/// Lifecycle engine for releases
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    storage: Arc<dyn StorageDriver>,
    client: Arc<dyn ResourceClient>,
    renderer: Arc<dyn Renderer>,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Create an orchestrator rendering with the strict default engine
    pub fn new(
        config: OrchestratorConfig,
        storage: Arc<dyn StorageDriver>,
        client: Arc<dyn ResourceClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            client,
            renderer: Arc::new(Engine::default()),
            tracker: TaskTracker::new(),
        }
    }

    /// Replace the renderer
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    /// Waits and atomic cleanups still running after their operation returned
    pub fn background_tasks(&self) -> usize {
        self.tracker.len()
    }

    // ========== Shared helpers ==========

    fn namespace(&self, requested: Option<&str>) -> String {
        requested
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.config.namespace.as_str())
            .to_string()
    }

    fn timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.config.timeout)
    }

    /// Atomic mode always waits; without an explicit strategy it watches
    fn resolve_wait(&self, requested: Option<WaitStrategy>, atomic: bool) -> WaitStrategy {
        let strategy = requested.unwrap_or(self.config.wait_strategy);
        if atomic && strategy.is_none() {
            WaitStrategy::StatusWatch
        } else {
            strategy
        }
    }

    fn waits(&self) -> WaitCoordinator {
        WaitCoordinator::new(self.tracker.clone())
    }

    /// Capabilities used for rendering
    ///
    /// Client-side rendering never contacts the cluster and assumes the
    /// configured (or default) platform version.
    async fn capabilities(&self, client_side: bool) -> Result<Capabilities> {
        let kube_version = if client_side {
            self.config
                .kube_version
                .as_deref()
                .map(KubeVersion::new)
                .unwrap_or_default()
        } else {
            self.client.server_version().await?
        };

        Ok(Capabilities {
            kube_version,
            ..Default::default()
        })
    }

    fn check_kube_version(&self, bundle: &Bundle, capabilities: &Capabilities) -> Result<()> {
        if bundle
            .metadata
            .supports_kube_version(&capabilities.kube_version)?
        {
            return Ok(());
        }
        Err(KubeError::KubeVersionIncompatible {
            constraint: bundle.metadata.kube_version.clone().unwrap_or_default(),
            version: capabilities.kube_version.to_string(),
        })
    }

    fn render(&self, bundle: &Bundle, context: &rudder_core::TemplateContext) -> Result<RenderedBundle> {
        Ok(self.renderer.render(bundle, context)?)
    }

    /// Check every resource against its live counterpart
    async fn check_ownership(
        &self,
        resources: &[Resource],
        release_name: &str,
        namespace: &str,
        take_ownership: bool,
    ) -> Result<()> {
        for resource in resources {
            let live = self.client.get(resource).await?;
            ownership::check(
                live.as_ref(),
                &resource.key(),
                release_name,
                namespace,
                take_ownership,
            )?;
        }
        Ok(())
    }

    /// Drop the oldest versions so that the next record fits in `max_history`
    ///
    /// The latest record and the latest deployed record are never removed.
    /// Failures are logged and ignored.
    async fn prune_history(&self, namespace: &str, name: &str) {
        let max = self.config.max_history as usize;
        if max == 0 {
            return;
        }

        let history = match self.storage.history(namespace, name).await {
            Ok(history) => history,
            Err(e) if e.is_release_not_found() => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read history for pruning");
                return;
            }
        };

        // history is newest first; one slot is kept for the record about to be written
        let keep = max.saturating_sub(1);
        if history.len() <= keep {
            return;
        }

        let latest = history.first().map(|r| r.version);
        let deployed = history
            .iter()
            .find(|r| r.status() == ReleaseStatus::Deployed)
            .map(|r| r.version);

        let mut excess = history.len() - keep;
        for record in history.iter().rev() {
            if excess == 0 {
                break;
            }
            if Some(record.version) == latest || Some(record.version) == deployed {
                continue;
            }
            match self.storage.delete(namespace, name, record.version).await {
                Ok(_) => {
                    tracing::debug!(version = record.version, "pruned release record");
                    excess -= 1;
                }
                Err(e) => {
                    tracing::warn!(version = record.version, error = %e, "failed to prune release record");
                }
            }
        }
    }

    /// Record a failure on a pending record; storage errors are only logged
    async fn record_failure(&self, release: &mut Release, description: String) {
        release.set_status(ReleaseStatus::Failed, description);
        if let Err(e) = self.storage.update(release).await {
            tracing::warn!(error = %e, "failed to record release failure");
        }
    }
}

/// Step of an operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    PreHooks,
    Apply,
    Wait,
    PostHooks,
}

impl Stage {
    /// Atomic recovery covers failures once the apply went through
    fn after_apply(self) -> bool {
        matches!(self, Stage::Wait | Stage::PostHooks)
    }

    fn fail(self) -> impl FnOnce(KubeError) -> StepFailure {
        move |error| StepFailure { stage: self, error }
    }
}

struct StepFailure {
    stage: Stage,
    error: KubeError,
}

impl StepFailure {
    /// Description recorded on the failed release
    fn describe(&self, release_name: &str, pre: &str, post: &str, operation: &str) -> String {
        match self.stage {
            Stage::PreHooks => format!("failed {}: {}", pre, self.error),
            Stage::PostHooks => format!("failed {}: {}", post, self.error),
            Stage::Apply | Stage::Wait => {
                format!("{} \"{}\" failed: {}", operation, release_name, self.error)
            }
        }
    }
}

/// Reject labels that collide with the storage system labels
fn check_labels<'a, V>(labels: impl IntoIterator<Item = (&'a String, V)>) -> Result<()> {
    if storage::reserved_labels_in(labels).is_empty() {
        return Ok(());
    }
    Err(KubeError::ReservedLabels {
        reserved: SYSTEM_LABELS.iter().map(|s| s.to_string()).collect(),
    })
}

fn check_hide_secret(hide_secret: bool, dry_run: bool) -> Result<()> {
    if hide_secret && !dry_run {
        return Err(KubeError::InvalidOptions(
            "Hiding Kubernetes secrets requires a dry-run mode".to_string(),
        ));
    }
    Ok(())
}

/// Latest record of a name, `None` when the name is unknown
async fn latest_record(storage: &dyn StorageDriver, namespace: &str, name: &str) -> Result<Option<Release>> {
    match storage.last(namespace, name).await {
        Ok(release) => Ok(Some(release)),
        Err(e) if e.is_release_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resources of `current` with no counterpart in `target`
///
/// Resources carrying the keep policy are left alone.
fn obsolete_resources(current: &[Resource], target: &[Resource]) -> Vec<Resource> {
    let wanted: Vec<ResourceKey> = target.iter().map(Resource::key).collect();
    let mut obsolete: Vec<Resource> = current
        .iter()
        .filter(|r| !wanted.contains(&r.key()))
        .filter(|r| {
            if r.has_keep_policy() {
                tracing::info!(resource = %r.key(), "keeping resource due to resource policy");
                false
            } else {
                true
            }
        })
        .cloned()
        .collect();
    crate::manifest::sort_for_uninstall(&mut obsolete);
    obsolete
}

/// Resources of `target` that `current` did not have
fn created_resources(current: &[Resource], target: &[Resource]) -> Vec<Resource> {
    let existing: Vec<ResourceKey> = current.iter().map(Resource::key).collect();
    target
        .iter()
        .filter(|r| !existing.contains(&r.key()))
        .cloned()
        .collect()
}

/// Write rendered templates under `dir`
///
/// Templates are written to `<dir>[/<release>]/<template path>`. The first
/// write of a path truncates it; documents written to the same path later
/// are appended.
fn write_output_dir(
    dir: &Path,
    release_name: Option<&str>,
    rendered: &RenderedBundle,
) -> Result<()> {
    let base = match release_name {
        Some(name) => dir.join(name),
        None => dir.to_path_buf(),
    };

    let mut written: Vec<std::path::PathBuf> = Vec::new();
    for template in &rendered.manifests {
        let path = base.join(&template.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let document = format!("---\n# Source: {}\n{}\n", template.path, template.content.trim_end());
        if written.contains(&path) {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
            file.write_all(document.as_bytes())?;
        } else {
            std::fs::write(&path, document)?;
            written.push(path);
        }
        tracing::debug!(path = %template.path, "wrote rendered template");
    }
    Ok(())
}
