//! Integration tests for install

mod common;

use std::time::Duration;

use common::{Fixture, NAMESPACE, hello_bundle, plain_bundle, stored_release};
use kube::api::DynamicObject;
use rudder_core::{ReleaseStatus, Values};
use rudder_kube::{
    DryRunMode, FakeResourceClient, HookEvent, HookRunPhase, InstallOptions, KubeError,
    OrchestratorConfig, ResourceKey, StorageDriver, WaitStrategy,
};
use tokio_util::sync::CancellationToken;

fn config_map(name: &str) -> ResourceKey {
    ResourceKey {
        group: String::new(),
        kind: "ConfigMap".to_string(),
        namespace: Some(NAMESPACE.to_string()),
        name: name.to_string(),
    }
}

fn live_hello(extra_metadata: &str) -> DynamicObject {
    serde_yaml::from_str(&format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: hello\n  namespace: spaced\n{}",
        extra_metadata
    ))
    .unwrap()
}

/// Cancel `token` after `after`
fn cancel_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}

mod basic {
    use super::*;

    #[tokio::test]
    async fn test_install_release() {
        let fx = Fixture::new();
        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &InstallOptions::new("test-install-release"))
            .await
            .unwrap();

        assert_eq!(release.name, "test-install-release");
        assert_eq!(release.namespace, NAMESPACE);
        assert_eq!(release.version, 1);
        assert_eq!(release.status(), ReleaseStatus::Deployed);
        assert_eq!(release.info.description, "Install complete");
        assert_eq!(
            release.info.notes.as_deref(),
            Some("Thanks for installing hello as test-install-release")
        );

        assert_eq!(release.hooks.len(), 1);
        let hook = &release.hooks[0];
        assert_eq!(hook.name, "smoke");
        assert_eq!(hook.events, vec![HookEvent::PostInstall, HookEvent::PreDelete]);
        assert_eq!(hook.last_run.phase, HookRunPhase::Succeeded);
        assert!(hook.last_run.completed_at.is_some());

        assert!(release.manifest.contains("---\n# Source: hello/templates/hello\n"));
        assert!(release.manifest.contains("hello: world"));
        assert!(!release.manifest.contains("kind: Job"));

        assert_eq!(fx.last("test-install-release").await, release);
        assert!(fx.client.is_live(&config_map("hello")));
        assert!(fx.client.is_live(&config_map("goodbye")));
    }

    #[tokio::test]
    async fn test_applied_objects_carry_ownership_markers() {
        let fx = Fixture::new();
        fx.orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::new("owned"))
            .await
            .unwrap();

        let live = fx.client.live_object(&config_map("hello")).unwrap();
        let labels = live.metadata.labels.unwrap();
        assert_eq!(labels["app.kubernetes.io/managed-by"], "Rudder");
        let annotations = live.metadata.annotations.unwrap();
        assert_eq!(annotations["meta.rudder.io/release-name"], "owned");
        assert_eq!(annotations["meta.rudder.io/release-namespace"], NAMESPACE);
    }

    #[tokio::test]
    async fn test_install_with_values() {
        let fx = Fixture::new();
        let overrides = Values::from_yaml("greeting: mars").unwrap();
        let release = fx
            .orchestrator
            .install(&plain_bundle(), overrides.clone(), &InstallOptions::new("values"))
            .await
            .unwrap();

        assert_eq!(release.config, overrides);
        assert_eq!(release.bundle_values, plain_bundle().values);
        insta::assert_snapshot!(release.manifest, @r###"
        ---
        # Source: hello/templates/hello
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: hello
        data:
          hello: mars
        "###);
    }

    #[tokio::test]
    async fn test_install_incorrect_template() {
        let fx = Fixture::new();
        let bundle = plain_bundle().with_template("templates/broken", "{{ values.missing.deep }}");

        let err = fx
            .orchestrator
            .install(&bundle, Values::new(), &InstallOptions::new("broken"))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Render(_)), "{err}");
        assert_eq!(fx.storage.release_count(), 0);
        assert!(fx.client.applied().is_empty());
    }

    #[tokio::test]
    async fn test_install_no_hooks() {
        let fx = Fixture::new();
        let mut options = InstallOptions::new("no-hooks");
        options.disable_hooks = true;

        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap();

        assert_eq!(release.hooks[0].last_run.phase, HookRunPhase::Unknown);
        assert!(fx.client.applied().iter().all(|key| key.kind != "Job"));
    }

    #[tokio::test]
    async fn test_install_failed_hooks() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_watch_until_ready_error("failed watch"));

        let err = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &InstallOptions::new("failed-hooks"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::HookFailed { .. }), "{err}");

        let stored = fx.last("failed-hooks").await;
        assert_eq!(stored.status(), ReleaseStatus::Failed);
        assert!(stored.info.description.contains("failed post-install"));
        assert!(stored.info.description.contains("failed watch"));
        assert_eq!(stored.hooks[0].last_run.phase, HookRunPhase::Failed);
    }

    #[tokio::test]
    async fn test_install_kube_version_mismatch() {
        let fx = Fixture::new();
        let bundle = plain_bundle().with_kube_version(">=99.0.0");

        let err = fx
            .orchestrator
            .install(&bundle, Values::new(), &InstallOptions::new("kube-version"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "bundle requires kubeVersion: >=99.0.0 which is incompatible with Kubernetes v1.31.0"
        );
        assert_eq!(fx.storage.release_count(), 0);
    }

    #[tokio::test]
    async fn test_client_only_skips_kube_version_check() {
        let config = OrchestratorConfig {
            client_only: true,
            ..Default::default()
        };
        let fx = Fixture::with_config(config, FakeResourceClient::new());
        let bundle = plain_bundle().with_kube_version(">=99.0.0");

        let release = fx
            .orchestrator
            .install(&bundle, Values::new(), &InstallOptions::new("client-only"))
            .await
            .unwrap();
        assert_eq!(release.info.description, "Dry run complete");
        assert_eq!(fx.storage.release_count(), 0);
    }
}

mod naming {
    use super::*;

    #[tokio::test]
    async fn test_install_no_name() {
        let fx = Fixture::new();
        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "must either provide a name or specify generate-name");
    }

    #[tokio::test]
    async fn test_install_invalid_name() {
        let fx = Fixture::new();
        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::new("Not_Valid"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::InvalidReleaseName(_)));
    }

    #[tokio::test]
    async fn test_install_name_template() {
        let fx = Fixture::new();
        let options = InstallOptions {
            name_template: Some("{{ 'foobar' }}".to_string()),
            ..Default::default()
        };
        let release = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert_eq!(release.name, "foobar");
    }

    #[tokio::test]
    async fn test_install_generated_name() {
        let fx = Fixture::new();
        let options = InstallOptions {
            generate_name: true,
            ..Default::default()
        };
        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert!(release.name.starts_with("hello-"), "{}", release.name);
    }

    #[tokio::test]
    async fn test_install_name_in_use() {
        let fx = Fixture::new();
        fx.seed(&stored_release("taken", 1, ReleaseStatus::Deployed)).await;

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::new("taken"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot re-use a name that is still in use");

        // replace never overwrites a deployed release
        let mut options = InstallOptions::new("taken");
        options.replace = true;
        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::NameInUse { .. }));
    }

    #[tokio::test]
    async fn test_install_replace_release() {
        let fx = Fixture::new();
        fx.seed(&stored_release("replaced", 1, ReleaseStatus::Uninstalled)).await;

        let mut options = InstallOptions::new("replaced");
        options.replace = true;
        let release = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap();

        assert_eq!(release.version, 2);
        assert_eq!(release.status(), ReleaseStatus::Deployed);

        let history = fx.history("replaced").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status(), ReleaseStatus::Uninstalled);
    }
}

mod ownership {
    use super::*;

    #[tokio::test]
    async fn test_unowned_object_blocks_install() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_object(live_hello("")));

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::new("adopt"))
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("unable to continue with install: "), "{message}");
        assert!(message.contains(
            "ConfigMap \"hello\" in namespace \"spaced\" exists and cannot be imported into the current release"
        ));
        assert!(fx.storage.last(NAMESPACE, "adopt").await.unwrap_err().is_release_not_found());
        assert!(fx.client.applied().is_empty());
    }

    #[tokio::test]
    async fn test_take_ownership_adopts_object() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_object(live_hello("")));
        let mut options = InstallOptions::new("adopt");
        options.take_ownership = true;

        let release = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert_eq!(release.status(), ReleaseStatus::Deployed);

        let live = fx.client.live_object(&config_map("hello")).unwrap();
        assert_eq!(
            live.metadata.annotations.unwrap()["meta.rudder.io/release-name"],
            "adopt"
        );
    }

    #[tokio::test]
    async fn test_object_of_other_release_is_never_adopted() {
        let other = live_hello(
            "  labels:\n    app.kubernetes.io/managed-by: Rudder\n  annotations:\n    meta.rudder.io/release-name: other\n    meta.rudder.io/release-namespace: spaced\n",
        );
        let fx = Fixture::with_client(FakeResourceClient::new().with_object(other));
        let mut options = InstallOptions::new("adopt");
        options.take_ownership = true;

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("owned by release \"other\""), "{err}");
    }
}

mod dry_run {
    use super::*;

    #[tokio::test]
    async fn test_install_dry_run() {
        let fx = Fixture::new();
        let options = InstallOptions::new("dry-run").with_dry_run(DryRunMode::Server);

        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap();

        assert_eq!(release.info.description, "Dry run complete");
        assert_eq!(release.status(), ReleaseStatus::PendingInstall);
        assert!(release.manifest.contains("kind: Secret"));
        assert!(release.info.notes.is_some());
        assert_eq!(fx.storage.release_count(), 0);
        assert!(fx.client.applied().is_empty());
    }

    #[tokio::test]
    async fn test_install_dry_run_hidden_secret() {
        let fx = Fixture::new();
        let mut options = InstallOptions::new("hidden").with_dry_run(DryRunMode::Client);
        options.hide_secret = true;

        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert!(!release.manifest.contains("kind: Secret"));
        assert!(release.manifest.contains("kind: ConfigMap"));
    }

    #[tokio::test]
    async fn test_hidden_secret_requires_dry_run() {
        let fx = Fixture::new();
        let mut options = InstallOptions::new("hidden");
        options.hide_secret = true;

        let err = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Hiding Kubernetes secrets requires a dry-run mode");
    }

    #[tokio::test]
    async fn test_install_output_dir() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let mut options = InstallOptions::new("rendered");
        options.output_dir = Some(dir.path().to_path_buf());
        options.use_release_name = true;

        let release = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert_eq!(release.info.description, "Dry run complete");
        assert_eq!(fx.storage.release_count(), 0);

        let hello = std::fs::read_to_string(dir.path().join("rendered/hello/templates/hello")).unwrap();
        assert!(hello.starts_with("---\n# Source: hello/templates/hello\n"));
        assert!(hello.contains("kind: ConfigMap"));
        assert!(dir.path().join("rendered/hello/templates/secret.yaml").exists());
        assert!(!dir.path().join("rendered/hello/templates/NOTES.txt").exists());
    }
}

mod labels {
    use super::*;

    #[tokio::test]
    async fn test_install_labels() {
        let fx = Fixture::new();
        let options = InstallOptions::new("labelled")
            .with_label("key1", "val1")
            .with_label("key2", "val2");

        let release = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert_eq!(release.labels["key1"], "val1");
        assert_eq!(fx.last("labelled").await.labels.len(), 2);

        let system = fx.storage.labels(NAMESPACE, "labelled", 1).unwrap();
        assert_eq!(system["status"], "deployed");
        assert_eq!(system["owner"], "rudder");
    }

    #[tokio::test]
    async fn test_install_system_labels_rejected() {
        let fx = Fixture::new();
        let options = InstallOptions::new("labelled").with_label("owner", "me");

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "user supplied labels contains system reserved label name. System labels: [name owner status version createdAt modifiedAt]"
        );
    }
}

mod wait {
    use super::*;

    #[tokio::test]
    async fn test_install_wait_failure() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_wait_error("I timed out"));
        let options =
            InstallOptions::new("waited").with_wait(WaitStrategy::StatusWatch, Duration::from_secs(1));

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("I timed out"));

        let stored = fx.last("waited").await;
        assert_eq!(stored.status(), ReleaseStatus::Failed);
        assert!(stored.info.description.contains("I timed out"));
        assert_eq!(fx.client.wait_calls(), 1);
    }

    #[tokio::test]
    async fn test_install_wait_for_jobs() {
        let fx = Fixture::new();
        let mut options =
            InstallOptions::new("jobs").with_wait(WaitStrategy::LegacyPoll, Duration::from_secs(1));
        options.wait_for_jobs = true;

        let release = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap();
        assert_eq!(release.status(), ReleaseStatus::Deployed);
        assert_eq!(fx.client.wait_calls(), 1);
    }

    #[tokio::test]
    async fn test_install_without_wait_never_waits() {
        let fx = Fixture::new();
        fx.orchestrator
            .install(&plain_bundle(), Values::new(), &InstallOptions::new("no-wait"))
            .await
            .unwrap();
        assert_eq!(fx.client.wait_calls(), 0);
    }

    #[tokio::test]
    async fn test_install_wait_interrupted() {
        let fx = Fixture::with_client(
            FakeResourceClient::new().with_wait_duration(Duration::from_millis(1500)),
        );
        let options =
            InstallOptions::new("interrupted").with_wait(WaitStrategy::StatusWatch, Duration::from_secs(5));
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(200));

        let before = fx.orchestrator.background_tasks();
        let err = fx
            .orchestrator
            .install_with_cancel(&plain_bundle(), Values::new(), &options, &token)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "context canceled");
        assert_eq!(fx.orchestrator.background_tasks(), before + 1);

        let stored = fx.last("interrupted").await;
        assert_eq!(stored.status(), ReleaseStatus::Failed);
        assert!(stored.info.description.contains("context canceled"));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fx.orchestrator.background_tasks(), before);
    }

    #[tokio::test]
    async fn test_cancel_after_install_keeps_deployed_record() {
        let fx = Fixture::new();
        let options =
            InstallOptions::new("settled").with_wait(WaitStrategy::StatusWatch, Duration::from_secs(1));
        let token = CancellationToken::new();

        let before = fx.orchestrator.background_tasks();
        let release = fx
            .orchestrator
            .install_with_cancel(&plain_bundle(), Values::new(), &options, &token)
            .await
            .unwrap();
        assert_eq!(release.status(), ReleaseStatus::Deployed);

        token.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stored = fx.last("settled").await;
        assert_eq!(stored.version, 1);
        assert_eq!(stored.status(), ReleaseStatus::Deployed);
        assert_eq!(stored.info.description, "Install complete");
        assert_eq!(fx.history("settled").await.len(), 1);
        assert_eq!(fx.orchestrator.background_tasks(), before);
    }
}

mod atomic {
    use super::*;

    #[tokio::test]
    async fn test_atomic_install_uninstalls_on_failure() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_wait_error("I timed out"));
        let options = InstallOptions::new("atomic").with_atomic();

        let err = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("I timed out"), "{message}");
        assert!(message.contains("atomic"), "{message}");
        assert!(fx.storage.last(NAMESPACE, "atomic").await.unwrap_err().is_release_not_found());
        assert!(!fx.client.is_live(&config_map("hello")));
        // atomic implies a wait even though none was requested
        assert_eq!(fx.client.wait_calls(), 1);
    }

    #[tokio::test]
    async fn test_atomic_install_cleanup_failure() {
        let fx = Fixture::with_client(
            FakeResourceClient::new()
                .with_wait_error("I timed out")
                .with_delete_error("uninstall fail"),
        );
        let options = InstallOptions::new("atomic").with_atomic();

        let err = fx
            .orchestrator
            .install(&hello_bundle(), Values::new(), &options)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("uninstall fail"), "{message}");
        assert!(message.contains("an error occurred while uninstalling the release"), "{message}");
        assert!(message.contains("I timed out"), "{message}");
    }

    #[tokio::test]
    async fn test_atomic_ignores_pre_apply_failures() {
        let fx = Fixture::with_client(FakeResourceClient::new().with_apply_error("apply fail"));
        let options = InstallOptions::new("atomic").with_atomic();

        let err = fx
            .orchestrator
            .install(&plain_bundle(), Values::new(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Apply { .. }), "{err}");
        assert_eq!(fx.last("atomic").await.status(), ReleaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_atomic_install_interrupted() {
        let fx = Fixture::with_client(
            FakeResourceClient::new().with_wait_duration(Duration::from_millis(1500)),
        );
        let options = InstallOptions::new("interrupted-atomic").with_atomic();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(200));

        let before = fx.orchestrator.background_tasks();
        let err = fx
            .orchestrator
            .install_with_cancel(&hello_bundle(), Values::new(), &options, &token)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("context canceled"), "{message}");
        assert!(message.contains("atomic"), "{message}");
        assert!(message.contains("uninstalled"), "{message}");
        assert!(err.is_cancelled());

        assert!(
            fx.storage
                .last(NAMESPACE, "interrupted-atomic")
                .await
                .unwrap_err()
                .is_release_not_found()
        );

        // the interrupted wait is still running; the cleanup already finished
        assert_eq!(fx.orchestrator.background_tasks(), before + 1);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(fx.orchestrator.background_tasks(), before);
    }
}
