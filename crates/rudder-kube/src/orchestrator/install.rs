use std::time::Duration;

use rudder_core::{Bundle, ReleaseInfo, ReleaseStatus, TemplateContext, Values};
use tokio_util::sync::CancellationToken;

use super::{Orchestrator, Stage, StepFailure, check_hide_secret, check_labels, latest_record, write_output_dir};
use crate::actions::{DryRunMode, InstallOptions, UninstallOptions};
use crate::error::{KubeError, Result};
use crate::hooks::{HookEvent, HookExecutor};
use crate::manifest::{self, Resource};
use crate::naming;
use crate::ownership;
use crate::release::Release;
use crate::wait::WaitStrategy;

impl Orchestrator {
    // ========== Install ==========

    /// Install a bundle as a new release
    pub async fn install(&self, bundle: &Bundle, values: Values, options: &InstallOptions) -> Result<Release> {
        self.install_with_cancel(bundle, values, options, &CancellationToken::new())
            .await
    }

    /// Install, giving up the readiness wait when `cancel` fires
    #[tracing::instrument(skip_all, fields(release = tracing::field::Empty, namespace = tracing::field::Empty))]
    pub async fn install_with_cancel(
        &self,
        bundle: &Bundle,
        values: Values,
        options: &InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Release> {
        let client_side = self.config.client_only || options.dry_run == DryRunMode::Client;
        let dry_run = client_side || options.dry_run.is_dry_run() || options.output_dir.is_some();

        check_hide_secret(options.hide_secret, dry_run)?;
        check_labels(&options.labels)?;

        let name = naming::resolve_release_name(options, bundle.source.as_deref())?;
        naming::validate_release_name(&name)?;
        let namespace = self.namespace(options.namespace.as_deref());

        let span = tracing::Span::current();
        span.record("release", name.as_str());
        span.record("namespace", namespace.as_str());

        // Name availability; dry runs never look at history
        let latest = if dry_run {
            None
        } else {
            latest_record(self.storage.as_ref(), &namespace, &name).await?
        };
        if let Some(last) = &latest
            && !(options.replace && last.status() != ReleaseStatus::Deployed)
        {
            return Err(KubeError::NameInUse { name });
        }
        let version = latest.as_ref().map(|r| r.version + 1).unwrap_or(1);

        // Platform constraint
        let capabilities = self.capabilities(client_side).await?;
        if !client_side {
            self.check_kube_version(bundle, &capabilities)?;
        }

        // Render
        let effective = Values::merge_all([&bundle.values, &values]);
        let context = TemplateContext::new(
            effective,
            ReleaseInfo::for_install(&name, &namespace, version),
            &bundle.metadata,
        )
        .with_capabilities(capabilities);
        let rendered = self.render(bundle, &context)?;
        let split = manifest::split_rendered(&rendered, &namespace)?;

        let mut release = Release::new(&name, &namespace, version, bundle.metadata.clone());
        release.bundle_values = bundle.values.clone();
        release.config = values;
        release.manifest = manifest::assemble(&split.resources, false);
        release.hooks = split.hooks;
        release.labels = options.labels.clone();
        release.info.notes = rendered.notes.clone();
        release.set_status(ReleaseStatus::PendingInstall, "Initial install underway");

        if let Some(dir) = &options.output_dir {
            let nested = options.use_release_name.then_some(name.as_str());
            write_output_dir(dir, nested, &rendered)?;
        }

        // Bail out here if it is a dry run
        if dry_run {
            if options.hide_secret {
                release.manifest = manifest::assemble(&split.resources, true);
            }
            release.info.description = "Dry run complete".to_string();
            tracing::info!(version, "dry run complete");
            return Ok(release);
        }

        let mut resources = split.resources;
        self.check_ownership(&resources, &name, &namespace, options.take_ownership)
            .await
            .map_err(|e| KubeError::UnableToContinue {
                operation: "install".to_string(),
                source: Box::new(e),
            })?;
        for resource in &mut resources {
            ownership::stamp(resource, &name, &namespace);
        }

        // Replacing a name: the previous latest record steps aside
        if let Some(mut last) = latest
            && last.status() != ReleaseStatus::Uninstalled
        {
            last.mark_superseded();
            self.storage.update(&last).await?;
        }

        self.prune_history(&namespace, &name).await;

        // Store the pending release
        self.storage.create(&release).await?;
        tracing::info!(version, "installing release");

        let timeout = self.timeout(options.timeout);
        let wait = self.resolve_wait(options.wait, options.atomic);

        match self
            .perform_install(&mut release, resources, options, wait, timeout, cancel)
            .await
        {
            Ok(()) => {
                let description = options
                    .description
                    .clone()
                    .unwrap_or_else(|| "Install complete".to_string());
                release.set_status(ReleaseStatus::Deployed, description);
                self.storage.update(&release).await?;
                tracing::info!(version, "release installed");
                Ok(release)
            }
            Err(failure) => Err(self.fail_install(release, failure, options.atomic, timeout).await),
        }
    }

    async fn perform_install(
        &self,
        release: &mut Release,
        resources: Vec<Resource>,
        options: &InstallOptions,
        wait: WaitStrategy,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), StepFailure> {
        let hooks = HookExecutor::new(self.client.as_ref());

        if !options.disable_hooks {
            hooks
                .run(release, HookEvent::PreInstall, timeout)
                .await
                .map_err(Stage::PreHooks.fail())?;
        }

        self.client
            .apply(&resources)
            .await
            .map_err(Stage::Apply.fail())?;
        tracing::debug!(count = resources.len(), "resources applied");

        self.waits()
            .wait(
                self.client.clone(),
                resources,
                wait,
                timeout,
                options.wait_for_jobs,
                cancel,
            )
            .await
            .map_err(Stage::Wait.fail())?;

        if !options.disable_hooks {
            hooks
                .run(release, HookEvent::PostInstall, timeout)
                .await
                .map_err(Stage::PostHooks.fail())?;
        }

        Ok(())
    }

    /// Record the failure and, in atomic mode, uninstall the release again
    async fn fail_install(
        &self,
        mut release: Release,
        failure: StepFailure,
        atomic: bool,
        timeout: Duration,
    ) -> KubeError {
        let description = failure.describe(&release.name, "pre-install", "post-install", "Release");
        tracing::warn!(error = %failure.error, "install failed");
        self.record_failure(&mut release, description).await;

        if !(atomic && failure.stage.after_apply()) {
            return failure.error;
        }

        tracing::info!("atomic is set, uninstalling release");
        let this = self.clone();
        let name = release.name.clone();
        let options = UninstallOptions {
            namespace: Some(release.namespace.clone()),
            disable_hooks: true,
            keep_history: false,
            timeout: Some(timeout),
            ..Default::default()
        };

        // Tracked so that the cleanup outlives a dropped caller future
        let cleanup = self
            .tracker
            .spawn(async move { this.uninstall(&name, &options).await.map(|_| ()) })
            .await
            .unwrap_or_else(|e| Err(KubeError::Storage(format!("atomic cleanup task failed: {}", e))));

        match cleanup {
            Ok(()) => KubeError::AtomicUninstalled {
                name: release.name,
                source: Box::new(failure.error),
            },
            Err(cleanup) => KubeError::AtomicUninstallFailed {
                original: Box::new(failure.error),
                cleanup: Box::new(cleanup),
            },
        }
    }
}
