use std::time::Duration;

use rudder_core::ReleaseStatus;
use tokio_util::sync::CancellationToken;

use super::{Orchestrator, Stage, StepFailure, created_resources, obsolete_resources};
use crate::actions::RollbackOptions;
use crate::error::{KubeError, Result};
use crate::hooks::{HookEvent, HookExecution, HookExecutor};
use crate::manifest::{self, Resource};
use crate::naming;
use crate::ownership;
use crate::release::Release;
use crate::wait::WaitStrategy;

impl Orchestrator {
    // ========== Rollback ==========

    /// Redeploy a previous version as a new version
    pub async fn rollback(&self, name: &str, options: &RollbackOptions) -> Result<Release> {
        self.rollback_with_cancel(name, options, &CancellationToken::new())
            .await
    }

    /// Roll back, giving up the readiness wait when `cancel` fires
    #[tracing::instrument(skip_all, fields(release = %name, namespace = tracing::field::Empty))]
    pub async fn rollback_with_cancel(
        &self,
        name: &str,
        options: &RollbackOptions,
        cancel: &CancellationToken,
    ) -> Result<Release> {
        naming::validate_release_name(name)?;
        let namespace = self.namespace(options.namespace.as_deref());
        tracing::Span::current().record("namespace", namespace.as_str());

        let history = self.storage.history(&namespace, name).await?;
        let Some(current) = history.first().cloned() else {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace,
            });
        };

        let wanted = if options.version == 0 {
            current.version.saturating_sub(1)
        } else {
            options.version
        };
        if wanted == 0 {
            return Err(KubeError::RollbackNotPossible {
                name: name.to_string(),
                reason: "no previous version to roll back to".to_string(),
            });
        }
        let Some(previous) = history.iter().find(|r| r.version == wanted).cloned() else {
            return Err(KubeError::RollbackNotPossible {
                name: name.to_string(),
                reason: format!("release has no {} version", wanted),
            });
        };

        // The new version is a copy of the target with fresh hook state
        let version = current.version + 1;
        let mut target = Release::new(name, &namespace, version, previous.bundle.clone());
        target.info.first_deployed = previous.info.first_deployed;
        target.info.notes = previous.info.notes.clone();
        target.bundle_values = previous.bundle_values.clone();
        target.config = previous.config.clone();
        target.manifest = previous.manifest.clone();
        target.labels = previous.labels.clone();
        target.hooks = previous
            .hooks
            .iter()
            .cloned()
            .map(|mut hook| {
                hook.last_run = HookExecution::default();
                hook
            })
            .collect();
        target.set_status(
            ReleaseStatus::PendingRollback,
            format!("Rollback to {}", wanted),
        );

        if options.dry_run {
            tracing::info!(version, to = wanted, "dry run for rollback");
            return Ok(target);
        }

        let current_resources = manifest::parse_stored(&current.manifest, &namespace)?;
        let mut target_resources = manifest::parse_stored(&target.manifest, &namespace)?;
        manifest::sort_for_install(&mut target_resources);
        for resource in &mut target_resources {
            ownership::stamp(resource, name, &namespace);
        }
        let created = created_resources(&current_resources, &target_resources);

        self.prune_history(&namespace, name).await;

        self.storage.create(&target).await?;
        tracing::info!(version, to = wanted, "rolling back release");

        let timeout = self.timeout(options.timeout);
        let wait = self.resolve_wait(options.wait, false);

        match self
            .perform_rollback(&mut target, &current_resources, target_resources, options, wait, timeout, cancel)
            .await
        {
            Ok(()) => {
                // Every earlier deployed version steps aside
                let deployed: Vec<Release> = self
                    .storage
                    .history(&namespace, name)
                    .await?
                    .into_iter()
                    .filter(|r| r.version != version && r.status() == ReleaseStatus::Deployed)
                    .collect();
                for mut record in deployed {
                    record.mark_superseded();
                    self.storage.update(&record).await?;
                }

                let description = target.info.description.clone();
                target.set_status(ReleaseStatus::Deployed, description);
                self.storage.update(&target).await?;
                tracing::info!(version, "rollback complete");
                Ok(target)
            }
            Err(failure) => {
                let description = failure.describe(name, "pre-rollback", "post-rollback", "Rollback");
                tracing::warn!(error = %failure.error, "rollback failed");

                let mut current = current;
                current.mark_superseded();
                if let Err(e) = self.storage.update(&current).await {
                    tracing::warn!(error = %e, "failed to record superseded release");
                }
                self.record_failure(&mut target, description).await;

                if options.cleanup_on_fail && !created.is_empty() {
                    let mut created = created;
                    manifest::sort_for_uninstall(&mut created);
                    if let Err(e) = self.client.delete(&created).await {
                        tracing::warn!(error = %e, "failed to delete newly created resources");
                    }
                }

                Err(failure.error)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform_rollback(
        &self,
        release: &mut Release,
        current: &[Resource],
        target: Vec<Resource>,
        options: &RollbackOptions,
        wait: WaitStrategy,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StepFailure> {
        let hooks = HookExecutor::new(self.client.as_ref());

        if !options.disable_hooks {
            hooks
                .run(release, HookEvent::PreRollback, timeout)
                .await
                .map_err(Stage::PreHooks.fail())?;
        }

        self.client
            .apply(&target)
            .await
            .map_err(Stage::Apply.fail())?;

        let obsolete = obsolete_resources(current, &target);
        if !obsolete.is_empty() {
            self.client
                .delete(&obsolete)
                .await
                .map_err(Stage::Apply.fail())?;
        }

        self.waits()
            .wait(
                self.client.clone(),
                target,
                wait,
                timeout,
                options.wait_for_jobs,
                cancel,
            )
            .await
            .map_err(Stage::Wait.fail())?;

        if !options.disable_hooks {
            hooks
                .run(release, HookEvent::PostRollback, timeout)
                .await
                .map_err(Stage::PostHooks.fail())?;
        }

        Ok(())
    }
}
