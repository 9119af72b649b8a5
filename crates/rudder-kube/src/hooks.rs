//! Lifecycle hooks
//!
//! A hook is a manifest document annotated with `rudder.io/hook` (or
//! `helm.sh/hook`). Hooks are rendered once with their release and never
//! change afterwards, except for their last-run record.
//!
//! Within one event, hooks run strictly one after another, ordered by weight
//! and then by manifest order. The first failure stops the batch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotations;
use crate::client::ResourceClient;
use crate::error::{KubeError, Result};
use crate::manifest::Resource;
use crate::release::Release;

/// Event that triggers a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    /// Run on demand only, never by install, upgrade or rollback
    Test,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreInstall => "pre-install",
            HookEvent::PostInstall => "post-install",
            HookEvent::PreUpgrade => "pre-upgrade",
            HookEvent::PostUpgrade => "post-upgrade",
            HookEvent::PreRollback => "pre-rollback",
            HookEvent::PostRollback => "post-rollback",
            HookEvent::PreDelete => "pre-delete",
            HookEvent::PostDelete => "post-delete",
            HookEvent::Test => "test",
        }
    }

    /// Parse an annotation event name
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "pre-install" => HookEvent::PreInstall,
            "post-install" => HookEvent::PostInstall,
            "pre-upgrade" => HookEvent::PreUpgrade,
            "post-upgrade" => HookEvent::PostUpgrade,
            "pre-rollback" => HookEvent::PreRollback,
            "post-rollback" => HookEvent::PostRollback,
            "pre-delete" => HookEvent::PreDelete,
            "post-delete" => HookEvent::PostDelete,
            "test" | "test-success" => HookEvent::Test,
            _ => return None,
        })
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When the hook object is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookDeletePolicy {
    /// Delete a previous object with the same identity before creating
    BeforeHookCreation,
    /// Delete after the hook became ready
    HookSucceeded,
    /// Delete after the hook failed
    HookFailed,
}

impl HookDeletePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "before-hook-creation" => Some(Self::BeforeHookCreation),
            "hook-succeeded" => Some(Self::HookSucceeded),
            "hook-failed" => Some(Self::HookFailed),
            _ => None,
        }
    }
}

/// Outcome of the last hook run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookRunPhase {
    #[default]
    Unknown,
    Running,
    Succeeded,
    Failed,
}

/// Last-run record of a hook
///
/// A `None` completion time means the hook never ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookExecution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub phase: HookRunPhase,
}

/// Hook definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Object name
    pub name: String,

    /// Object kind
    pub kind: String,

    /// Template the hook was rendered from
    pub path: String,

    /// Rendered document
    pub manifest: String,

    /// Events that trigger the hook
    pub events: Vec<HookEvent>,

    /// Ordering within an event (ascending)
    #[serde(default)]
    pub weight: i32,

    #[serde(default)]
    pub delete_policies: Vec<HookDeletePolicy>,

    /// Per-hook timeout; the operation timeout applies when unset
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub last_run: HookExecution,
}

impl Hook {
    /// Build a hook from an annotated resource
    pub fn from_resource(resource: &Resource) -> Self {
        let empty = Default::default();
        let annotations = resource.annotations().unwrap_or(&empty);

        Self {
            name: resource.name().to_string(),
            kind: resource.kind().to_string(),
            path: resource.source.clone(),
            manifest: resource.content.clone(),
            events: annotations::parse_hook_events(annotations),
            weight: annotations::parse_hook_weight(annotations),
            delete_policies: annotations::parse_delete_policies(annotations),
            timeout: annotations::parse_hook_timeout(annotations),
            last_run: HookExecution::default(),
        }
    }

    pub fn runs_on(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn has_policy(&self, policy: HookDeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }
}

/// Runs the hooks of a release for one event
pub struct HookExecutor<'a> {
    client: &'a dyn ResourceClient,
}

impl<'a> HookExecutor<'a> {
    pub fn new(client: &'a dyn ResourceClient) -> Self {
        Self { client }
    }

    /// Run every hook of `release` bound to `event`
    ///
    /// Updates the last-run record of each executed hook. The error names the
    /// failing hook's template path.
    pub async fn run(&self, release: &mut Release, event: HookEvent, timeout: Duration) -> Result<()> {
        let mut order: Vec<usize> = release
            .hooks
            .iter()
            .enumerate()
            .filter(|(_, hook)| hook.runs_on(event))
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| release.hooks[i].weight);

        if order.is_empty() {
            return Ok(());
        }
        tracing::debug!(%event, count = order.len(), "running hooks");

        let namespace = release.namespace.clone();
        for index in order {
            let hook = &mut release.hooks[index];
            let resource = Resource::parse(&hook.path, &hook.manifest, &namespace)?;
            let fail = |message: String| KubeError::HookFailed {
                event: event.to_string(),
                path: hook_path(&resource),
                message,
            };

            if hook.has_policy(HookDeletePolicy::BeforeHookCreation) {
                self.client
                    .delete(std::slice::from_ref(&resource))
                    .await
                    .map_err(|e| fail(e.to_string()))?;
            }

            hook.last_run = HookExecution {
                started_at: Some(Utc::now()),
                completed_at: None,
                phase: HookRunPhase::Running,
            };

            let outcome = match self.client.apply(std::slice::from_ref(&resource)).await {
                Ok(()) => {
                    self.client
                        .watch_until_ready(&resource, hook.timeout.unwrap_or(timeout))
                        .await
                }
                Err(e) => Err(e),
            };

            hook.last_run.completed_at = Some(Utc::now());

            match outcome {
                Ok(()) => {
                    hook.last_run.phase = HookRunPhase::Succeeded;
                    tracing::debug!(hook = %hook.name, %event, "hook succeeded");
                    if hook.has_policy(HookDeletePolicy::HookSucceeded) {
                        self.cleanup(&resource).await;
                    }
                }
                Err(e) => {
                    hook.last_run.phase = HookRunPhase::Failed;
                    if hook.has_policy(HookDeletePolicy::HookFailed) {
                        self.cleanup(&resource).await;
                    }
                    return Err(fail(e.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn cleanup(&self, resource: &Resource) {
        if let Err(e) = self.client.delete(std::slice::from_ref(resource)).await {
            tracing::warn!(hook = resource.name(), error = %e, "failed to delete hook resource");
        }
    }
}

fn hook_path(resource: &Resource) -> String {
    resource.source.clone()
}
