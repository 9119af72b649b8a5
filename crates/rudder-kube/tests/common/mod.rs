//! Shared fixtures for orchestrator tests

#![allow(dead_code)]

use std::sync::Arc;

use rudder_core::{Bundle, Values};
use rudder_kube::{
    FakeResourceClient, MemoryDriver, Orchestrator, OrchestratorConfig, Release, StorageDriver,
};
use semver::Version;

pub const NAMESPACE: &str = "spaced";

pub const HELLO: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: hello\ndata:\n  hello: {{ values.greeting }}\n";

pub const GOODBYE: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: goodbye\ndata:\n  goodbye: world\n";

pub const SECRET: &str = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: credentials\nstringData:\n  password: hunter2\n";

pub const HOOK: &str = "apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: smoke\n  annotations:\n    rudder.io/hook: post-install,pre-delete\n";

pub const NOTES: &str = "Thanks for installing {{ bundle.name }} as {{ release.name }}";

/// Bundle with two config maps, a secret, a hook and notes
pub fn hello_bundle() -> Bundle {
    Bundle::new("hello", Version::new(0, 1, 0))
        .with_values(Values::from_yaml("greeting: world").unwrap())
        .with_template("templates/hello", HELLO)
        .with_template("templates/goodbye", GOODBYE)
        .with_template("templates/secret.yaml", SECRET)
        .with_template("templates/hooks", HOOK)
        .with_template("templates/NOTES.txt", NOTES)
        .with_source("bundles/hello")
}

/// Bundle with a single config map and nothing else
pub fn plain_bundle() -> Bundle {
    Bundle::new("hello", Version::new(0, 1, 0))
        .with_values(Values::from_yaml("greeting: world").unwrap())
        .with_template("templates/hello", HELLO)
}

pub struct Fixture {
    pub orchestrator: Orchestrator,
    pub storage: Arc<MemoryDriver>,
    pub client: Arc<FakeResourceClient>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_client(FakeResourceClient::new())
    }

    pub fn with_client(client: FakeResourceClient) -> Self {
        Self::with_config(OrchestratorConfig::default(), client)
    }

    pub fn with_config(mut config: OrchestratorConfig, client: FakeResourceClient) -> Self {
        config.namespace = NAMESPACE.to_string();
        let storage = Arc::new(MemoryDriver::new());
        let client = Arc::new(client);
        let orchestrator = Orchestrator::new(config, storage.clone(), client.clone());
        Self {
            orchestrator,
            storage,
            client,
        }
    }

    /// Latest stored record of a release
    pub async fn last(&self, name: &str) -> Release {
        self.storage.last(NAMESPACE, name).await.unwrap()
    }

    pub async fn history(&self, name: &str) -> Vec<Release> {
        self.storage.history(NAMESPACE, name).await.unwrap()
    }

    /// Store a record directly, bypassing the orchestrator
    pub async fn seed(&self, release: &Release) {
        self.storage.create(release).await.unwrap();
    }
}

/// A stored record for `name` in the given state
pub fn stored_release(name: &str, version: u32, status: rudder_core::ReleaseStatus) -> Release {
    let bundle = plain_bundle();
    let mut release = Release::new(name, NAMESPACE, version, bundle.metadata.clone());
    release.bundle_values = bundle.values.clone();
    release.manifest = "---\n# Source: hello/templates/hello\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: hello\ndata:\n  hello: world\n".to_string();
    release.set_status(status, "Named Release Stub");
    release
}
