//! Resource client
//!
//! The orchestrator talks to the cluster only through [`ResourceClient`].
//! [`KubeResourceClient`] is the kube-rs implementation; [`FakeResourceClient`]
//! keeps objects in memory and can be told to fail individual calls.

mod cluster;
mod fake;

pub use cluster::KubeResourceClient;
pub use fake::FakeResourceClient;

use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use rudder_core::KubeVersion;

use crate::error::Result;
use crate::manifest::Resource;
use crate::wait::WaitStrategy;

/// Cluster operations used by the release lifecycle
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Version reported by the API server
    async fn server_version(&self) -> Result<KubeVersion>;

    /// Fetch the live object for a resource, `None` when absent
    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>>;

    /// Create or update resources, in the given order
    async fn apply(&self, resources: &[Resource]) -> Result<()>;

    /// Delete resources, in the given order
    ///
    /// Objects that are already gone are not an error.
    async fn delete(&self, resources: &[Resource]) -> Result<()>;

    /// Wait until every resource is ready
    ///
    /// Jobs are only awaited when `wait_for_jobs` is set.
    async fn wait(
        &self,
        resources: &[Resource],
        strategy: WaitStrategy,
        timeout: Duration,
        wait_for_jobs: bool,
    ) -> Result<()>;

    /// Wait for a hook object to complete
    async fn watch_until_ready(&self, resource: &Resource, timeout: Duration) -> Result<()>;
}
