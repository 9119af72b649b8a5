use std::time::Duration;

use rudder_core::{Bundle, ReleaseInfo, ReleaseStatus, TemplateContext, Values};
use tokio_util::sync::CancellationToken;

use super::{
    Orchestrator, Stage, StepFailure, check_hide_secret, check_labels, created_resources,
    latest_record, obsolete_resources,
};
use crate::actions::{DryRunMode, RollbackOptions, UpgradeOptions, ValuesMode};
use crate::error::{KubeError, Result};
use crate::hooks::{HookEvent, HookExecutor};
use crate::manifest::{self, Resource};
use crate::naming;
use crate::ownership;
use crate::release::Release;
use crate::wait::WaitStrategy;

/// Bundle defaults and caller overrides a new version is rendered with
fn upgrade_values(mode: ValuesMode, current: &Release, bundle: &Bundle, overrides: Values) -> (Values, Values) {
    match mode {
        ValuesMode::Reuse => {
            tracing::debug!(version = current.version, "reusing the previous values");
            (
                current.bundle_values.clone(),
                Values::merge_all([&current.config, &overrides]),
            )
        }
        ValuesMode::ResetThenReuse => (
            bundle.values.clone(),
            Values::merge_all([&current.config, &overrides]),
        ),
        ValuesMode::Reset => (bundle.values.clone(), overrides),
        ValuesMode::Default if overrides.is_empty() && !current.config.is_empty() => {
            tracing::debug!(version = current.version, "copying the previous overrides");
            (bundle.values.clone(), current.config.clone())
        }
        ValuesMode::Default => (bundle.values.clone(), overrides),
    }
}

impl Orchestrator {
    // ========== Upgrade ==========

    /// Upgrade a release to a new bundle or new values
    pub async fn upgrade(
        &self,
        name: &str,
        bundle: &Bundle,
        values: Values,
        options: &UpgradeOptions,
    ) -> Result<Release> {
        self.upgrade_with_cancel(name, bundle, values, options, &CancellationToken::new())
            .await
    }

    /// Upgrade, giving up the readiness wait when `cancel` fires
    #[tracing::instrument(skip_all, fields(release = %name, namespace = tracing::field::Empty))]
    pub async fn upgrade_with_cancel(
        &self,
        name: &str,
        bundle: &Bundle,
        values: Values,
        options: &UpgradeOptions,
        cancel: &CancellationToken,
    ) -> Result<Release> {
        naming::validate_release_name(name)?;
        let namespace = self.namespace(options.namespace.as_deref());
        tracing::Span::current().record("namespace", namespace.as_str());

        let client_side = self.config.client_only || options.dry_run == DryRunMode::Client;
        let dry_run = client_side || options.dry_run.is_dry_run();

        check_hide_secret(options.hide_secret, dry_run)?;
        check_labels(&options.labels)?;

        let latest = latest_record(self.storage.as_ref(), &namespace, name).await?;

        // Upgrade-with-install falls back to an install for unknown or uninstalled names
        if options.install {
            match &latest {
                None => {
                    tracing::info!("release does not exist, installing it now");
                    return self
                        .install_with_cancel(bundle, values, &options.install_options(name, false), cancel)
                        .await;
                }
                Some(last) if last.status() == ReleaseStatus::Uninstalled => {
                    tracing::info!("release was uninstalled, installing it again");
                    return self
                        .install_with_cancel(bundle, values, &options.install_options(name, true), cancel)
                        .await;
                }
                Some(_) => {}
            }
        }

        let Some(latest) = latest else {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace,
            });
        };

        if latest.status().is_pending() {
            return Err(KubeError::OperationInProgress {
                name: name.to_string(),
                status: latest.status().to_string(),
            });
        }

        // The version being replaced
        let current = match self.storage.deployed(&namespace, name).await {
            Ok(deployed) => deployed,
            Err(KubeError::NoDeployedRelease { .. })
                if matches!(
                    latest.status(),
                    ReleaseStatus::Failed | ReleaseStatus::Superseded
                ) =>
            {
                latest.clone()
            }
            Err(e) => return Err(e),
        };

        let version = latest.version + 1;
        let (defaults, config) = upgrade_values(options.values_mode(), &current, bundle, values);

        let capabilities = self.capabilities(client_side).await?;
        if !client_side {
            self.check_kube_version(bundle, &capabilities)?;
        }

        let context = TemplateContext::new(
            Values::merge_all([&defaults, &config]),
            ReleaseInfo::for_upgrade(name, &namespace, version),
            &bundle.metadata,
        )
        .with_capabilities(capabilities);
        let rendered = self.render(bundle, &context)?;
        let split = manifest::split_rendered(&rendered, &namespace)?;

        let mut upgraded = Release::new(name, &namespace, version, bundle.metadata.clone());
        upgraded.info.first_deployed = current.info.first_deployed;
        upgraded.bundle_values = defaults;
        upgraded.config = config;
        upgraded.manifest = manifest::assemble(&split.resources, false);
        upgraded.hooks = split.hooks;
        upgraded.info.notes = rendered.notes;
        upgraded.labels = current.labels.clone();
        for (key, value) in &options.labels {
            match value {
                Some(value) => {
                    upgraded.labels.insert(key.clone(), value.clone());
                }
                None => {
                    upgraded.labels.remove(key);
                }
            }
        }
        upgraded.set_status(ReleaseStatus::PendingUpgrade, "Preparing upgrade");

        if dry_run {
            if options.hide_secret {
                upgraded.manifest = manifest::assemble(&split.resources, true);
            }
            upgraded.info.description = "Dry run complete".to_string();
            tracing::info!(version, "dry run complete");
            return Ok(upgraded);
        }

        let current_resources = manifest::parse_stored(&current.manifest, &namespace)?;
        let mut target = split.resources;

        // Only objects this release did not have before may need adopting
        let created = created_resources(&current_resources, &target);
        self.check_ownership(&created, name, &namespace, options.take_ownership)
            .await
            .map_err(|e| KubeError::UnableToContinue {
                operation: "upgrade".to_string(),
                source: Box::new(e),
            })?;
        for resource in &mut target {
            ownership::stamp(resource, name, &namespace);
        }

        self.prune_history(&namespace, name).await;

        self.storage.create(&upgraded).await?;
        tracing::info!(version, from = current.version, "upgrading release");

        let timeout = self.timeout(options.timeout);
        let wait = self.resolve_wait(options.wait, options.atomic);

        match self
            .perform_upgrade(&mut upgraded, &current_resources, target, options, wait, timeout, cancel)
            .await
        {
            Ok(()) => {
                // Two writes: between them no version reads as deployed
                let mut current = current;
                current.mark_superseded();
                self.storage.update(&current).await?;

                let description = options
                    .description
                    .clone()
                    .unwrap_or_else(|| "Upgrade complete".to_string());
                upgraded.set_status(ReleaseStatus::Deployed, description);
                self.storage.update(&upgraded).await?;
                tracing::info!(version, "release upgraded");
                Ok(upgraded)
            }
            Err(failure) => Err(self
                .fail_upgrade(upgraded, failure, created, options, wait, timeout)
                .await),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn perform_upgrade(
        &self,
        release: &mut Release,
        current: &[Resource],
        target: Vec<Resource>,
        options: &UpgradeOptions,
        wait: WaitStrategy,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StepFailure> {
        let hooks = HookExecutor::new(self.client.as_ref());

        if !options.disable_hooks {
            hooks
                .run(release, HookEvent::PreUpgrade, timeout)
                .await
                .map_err(Stage::PreHooks.fail())?;
        }

        self.client
            .apply(&target)
            .await
            .map_err(Stage::Apply.fail())?;

        let obsolete = obsolete_resources(current, &target);
        if !obsolete.is_empty() {
            tracing::debug!(count = obsolete.len(), "deleting resources no longer in the release");
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
                .run(release, HookEvent::PostUpgrade, timeout)
                .await
                .map_err(Stage::PostHooks.fail())?;
        }

        Ok(())
    }

    /// Record the failure, clean up and, in atomic mode, roll back
    async fn fail_upgrade(
        &self,
        mut release: Release,
        failure: StepFailure,
        created: Vec<Resource>,
        options: &UpgradeOptions,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> KubeError {
        let description = failure.describe(&release.name, "pre-upgrade", "post-upgrade", "Upgrade");
        tracing::warn!(error = %failure.error, "upgrade failed");
        self.record_failure(&mut release, description).await;

        if options.cleanup_on_fail && !created.is_empty() {
            tracing::info!(count = created.len(), "cleanup on fail set, deleting newly created resources");
            let mut created = created;
            manifest::sort_for_uninstall(&mut created);
            if let Err(e) = self.client.delete(&created).await {
                tracing::warn!(error = %e, "failed to delete newly created resources");
            }
        }

        if !(options.atomic && failure.stage.after_apply()) {
            return failure.error;
        }

        tracing::info!("atomic is set, rolling back to the last successful version");
        let target = match self.storage.history(&release.namespace, &release.name).await {
            Ok(history) => history
                .into_iter()
                .find(|r| matches!(r.status(), ReleaseStatus::Deployed | ReleaseStatus::Superseded))
                .map(|r| r.version),
            Err(e) => {
                return KubeError::AtomicRollbackFailed {
                    original: Box::new(failure.error),
                    cleanup: Box::new(e),
                };
            }
        };
        let Some(target) = target else {
            return KubeError::AtomicRollbackFailed {
                original: Box::new(failure.error),
                cleanup: Box::new(KubeError::RollbackNotPossible {
                    name: release.name.clone(),
                    reason: "no deployed or superseded version to roll back to".to_string(),
                }),
            };
        };

        let this = self.clone();
        let name = release.name.clone();
        let rollback = RollbackOptions {
            version: target,
            namespace: Some(release.namespace.clone()),
            disable_hooks: options.disable_hooks,
            wait: Some(wait),
            wait_for_jobs: options.wait_for_jobs,
            timeout: Some(timeout),
            cleanup_on_fail: options.cleanup_on_fail,
            ..Default::default()
        };

        let outcome = self
            .tracker
            .spawn(async move { this.rollback(&name, &rollback).await.map(|_| ()) })
            .await
            .unwrap_or_else(|e| Err(KubeError::Storage(format!("atomic rollback task failed: {}", e))));

        match outcome {
            Ok(()) => KubeError::AtomicRolledBack {
                name: release.name,
                source: Box::new(failure.error),
            },
            Err(cleanup) => KubeError::AtomicRollbackFailed {
                original: Box::new(failure.error),
                cleanup: Box::new(cleanup),
            },
        }
    }
}
