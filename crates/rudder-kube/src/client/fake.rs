//! In-memory resource client
//!
//! Applied objects are kept in a map keyed by [`ResourceKey`]. Every call can
//! be made to fail, and `wait` can be slowed down to exercise cancellation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use rudder_core::KubeVersion;

use super::ResourceClient;
use crate::error::{KubeError, Result};
use crate::manifest::{Resource, ResourceKey};
use crate::wait::WaitStrategy;

#[derive(Debug, Default)]
struct FakeState {
    live: HashMap<ResourceKey, DynamicObject>,
    applied: Vec<ResourceKey>,
    deleted: Vec<ResourceKey>,
    waits: usize,
}

/// Resource client backed by memory
#[derive(Debug, Default)]
pub struct FakeResourceClient {
    state: Mutex<FakeState>,
    kube_version: KubeVersion,
    apply_error: Option<String>,
    delete_error: Option<String>,
    wait_error: Option<String>,
    wait_duration: Duration,
    watch_until_ready_error: Option<String>,
}

impl FakeResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `wait` fail with this message
    pub fn with_wait_error(mut self, message: impl Into<String>) -> Self {
        self.wait_error = Some(message.into());
        self
    }

    /// Make `wait` sleep before it returns
    pub fn with_wait_duration(mut self, duration: Duration) -> Self {
        self.wait_duration = duration;
        self
    }

    /// Make hook waits fail with this message
    pub fn with_watch_until_ready_error(mut self, message: impl Into<String>) -> Self {
        self.watch_until_ready_error = Some(message.into());
        self
    }

    pub fn with_apply_error(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self
    }

    pub fn with_delete_error(mut self, message: impl Into<String>) -> Self {
        self.delete_error = Some(message.into());
        self
    }

    pub fn with_kube_version(mut self, version: &str) -> Self {
        self.kube_version = KubeVersion::new(version);
        self
    }

    /// Seed a live object, as if created outside any release
    pub fn with_object(self, object: DynamicObject) -> Self {
        if let Some(key) = ResourceKey::from_object(&object)
            && let Ok(mut state) = self.state.lock()
        {
            state.live.insert(key, object);
        }
        self
    }

    /// Keys passed to `apply`, in call order
    pub fn applied(&self) -> Vec<ResourceKey> {
        self.state.lock().map(|s| s.applied.clone()).unwrap_or_default()
    }

    /// Keys passed to `delete`, in call order
    pub fn deleted(&self) -> Vec<ResourceKey> {
        self.state.lock().map(|s| s.deleted.clone()).unwrap_or_default()
    }

    /// Number of `wait` calls that finished
    pub fn wait_calls(&self) -> usize {
        self.state.lock().map(|s| s.waits).unwrap_or_default()
    }

    pub fn is_live(&self, key: &ResourceKey) -> bool {
        self.live_object(key).is_some()
    }

    pub fn live_object(&self, key: &ResourceKey) -> Option<DynamicObject> {
        self.state.lock().ok()?.live.get(key).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, FakeState>> {
        self.state
            .lock()
            .map_err(|_| KubeError::Storage("fake client state poisoned".to_string()))
    }
}

#[async_trait]
impl ResourceClient for FakeResourceClient {
    async fn server_version(&self) -> Result<KubeVersion> {
        Ok(self.kube_version.clone())
    }

    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>> {
        Ok(self.lock()?.live.get(&resource.key()).cloned())
    }

    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        if let Some(message) = &self.apply_error
            && let Some(first) = resources.first()
        {
            return Err(KubeError::Apply {
                resource: first.key().to_string(),
                message: message.clone(),
            });
        }

        let mut state = self.lock()?;
        for resource in resources {
            let key = resource.key();
            state.applied.push(key.clone());
            state.live.insert(key, resource.object.clone());
        }
        Ok(())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        if let Some(message) = &self.delete_error
            && let Some(first) = resources.first()
        {
            return Err(KubeError::Delete {
                resource: first.key().to_string(),
                message: message.clone(),
            });
        }

        let mut state = self.lock()?;
        for resource in resources {
            let key = resource.key();
            state.live.remove(&key);
            state.deleted.push(key);
        }
        Ok(())
    }

    async fn wait(
        &self,
        _resources: &[Resource],
        _strategy: WaitStrategy,
        _timeout: Duration,
        _wait_for_jobs: bool,
    ) -> Result<()> {
        if !self.wait_duration.is_zero() {
            tokio::time::sleep(self.wait_duration).await;
        }
        self.lock()?.waits += 1;

        match &self.wait_error {
            Some(message) => Err(KubeError::WaitFailed(message.clone())),
            None => Ok(()),
        }
    }

    async fn watch_until_ready(&self, _resource: &Resource, _timeout: Duration) -> Result<()> {
        match &self.watch_until_ready_error {
            Some(message) => Err(KubeError::WaitFailed(message.clone())),
            None => Ok(()),
        }
    }
}
