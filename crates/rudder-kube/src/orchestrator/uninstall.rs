use chrono::Utc;
use rudder_core::ReleaseStatus;

use super::Orchestrator;
use crate::actions::UninstallOptions;
use crate::error::{KubeError, Result};
use crate::hooks::{HookEvent, HookExecutor};
use crate::manifest;
use crate::naming;
use crate::release::Release;

/// Outcome of an uninstall
#[derive(Debug, Clone)]
pub struct UninstallResponse {
    /// Final state of the latest record (already purged unless history was kept)
    pub release: Release,

    /// Resources left in place because of the keep policy
    pub info: String,
}

impl Orchestrator {
    // ========== Uninstall ==========

    /// Uninstall a release
    ///
    /// Deletion errors do not stop the uninstall; they are collected and
    /// returned together once the release has been marked uninstalled.
    #[tracing::instrument(skip_all, fields(release = %name, namespace = tracing::field::Empty))]
    pub async fn uninstall(&self, name: &str, options: &UninstallOptions) -> Result<UninstallResponse> {
        naming::validate_release_name(name)?;
        let namespace = self.namespace(options.namespace.as_deref());
        tracing::Span::current().record("namespace", namespace.as_str());

        let history = self.storage.history(&namespace, name).await?;
        let Some(mut release) = history.first().cloned() else {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
                namespace,
            });
        };

        if options.dry_run {
            return Ok(UninstallResponse {
                release,
                info: String::new(),
            });
        }

        if release.status() == ReleaseStatus::Uninstalled {
            if options.keep_history {
                return Err(KubeError::AlreadyUninstalled {
                    name: name.to_string(),
                });
            }
            tracing::info!("purging uninstalled release");
            self.purge(&history).await?;
            return Ok(UninstallResponse {
                release,
                info: String::new(),
            });
        }

        release.info.deleted = Some(Utc::now());
        release.set_status(ReleaseStatus::Uninstalling, "Deletion in progress");
        self.storage.update(&release).await?;
        tracing::info!(version = release.version, "uninstalling release");

        let timeout = self.timeout(options.timeout);
        let hooks = HookExecutor::new(self.client.as_ref());

        if !options.disable_hooks {
            hooks
                .run(&mut release, HookEvent::PreDelete, timeout)
                .await?;
        }

        let mut errors = Vec::new();
        let mut kept = Vec::new();

        match manifest::parse_stored(&release.manifest, &namespace) {
            Ok(mut resources) => {
                manifest::sort_for_uninstall(&mut resources);
                let (keep, delete): (Vec<_>, Vec<_>) =
                    resources.into_iter().partition(|r| r.has_keep_policy());
                kept.extend(keep.iter().map(|r| r.key().to_string()));

                if let Err(e) = self.client.delete(&delete).await {
                    errors.push(e.to_string());
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        if !options.disable_hooks
            && let Err(e) = hooks.run(&mut release, HookEvent::PostDelete, timeout).await
        {
            errors.push(e.to_string());
        }

        let description = options
            .description
            .clone()
            .unwrap_or_else(|| "Uninstallation complete".to_string());
        release.set_status(ReleaseStatus::Uninstalled, description);

        if options.keep_history {
            if let Err(e) = self.storage.update(&release).await {
                errors.push(format!("failed to record uninstalled release: {}", e));
            }
        } else if let Err(e) = self.purge(&history).await {
            errors.push(format!("failed to purge the release: {}", e));
        }

        let info = if kept.is_empty() {
            String::new()
        } else {
            format!(
                "These resources were kept due to the resource policy:\n{}\n",
                kept.iter()
                    .map(|k| format!("[{}]", k))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        if !errors.is_empty() {
            tracing::warn!(count = errors.len(), "uninstall completed with errors");
            return Err(KubeError::UninstallFailed {
                name: name.to_string(),
                errors,
            });
        }

        tracing::info!("release uninstalled");
        Ok(UninstallResponse { release, info })
    }

    async fn purge(&self, history: &[Release]) -> Result<()> {
        for record in history {
            self.storage
                .delete(&record.namespace, &record.name, record.version)
                .await?;
        }
        Ok(())
    }
}
