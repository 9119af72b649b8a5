//! kube-rs backed resource client
//!
//! Objects are handled as [`DynamicObject`]s resolved through API discovery,
//! applied with Server-Side Apply and deleted with background propagation.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{Discovery, Scope},
    runtime::wait::await_condition,
};
use rudder_core::KubeVersion;

use super::ResourceClient;
use crate::error::{KubeError, Result};
use crate::manifest::Resource;
use crate::readiness::{self, Readiness};
use crate::wait::WaitStrategy;

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "rudder";

/// Interval of the legacy polling strategy
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Resource client talking to a live cluster
pub struct KubeResourceClient {
    client: Client,
    /// Cached discovery information
    discovery: Discovery,
}

impl KubeResourceClient {
    /// Create a client and run API discovery
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    /// Connect with the inferred kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        Self::new(Client::try_default().await?).await
    }

    /// Create from an existing client and discovery (for reuse)
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self { client, discovery }
    }

    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    fn api_for(&self, resource: &Resource) -> Result<Api<DynamicObject>> {
        let types = resource.object.types.as_ref().ok_or_else(|| {
            KubeError::InvalidManifest(format!("{}: missing apiVersion or kind", resource.source))
        })?;
        let gvk = gvk_from_type_meta(types);

        let (api_resource, capabilities) = self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "unknown resource type: {}/{}",
                types.api_version, types.kind
            ))
        })?;

        if capabilities.scope == Scope::Namespaced {
            let ns = resource.namespace().unwrap_or("default");
            Ok(Api::namespaced_with(self.client.clone(), ns, &api_resource))
        } else {
            Ok(Api::all_with(self.client.clone(), &api_resource))
        }
    }

    async fn apply_one(&self, resource: &Resource) -> Result<()> {
        let api = self.api_for(resource)?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(resource.name(), &params, &Patch::Apply(&resource.object))
            .await
            .map_err(|e| KubeError::Apply {
                resource: resource.key().to_string(),
                message: e.to_string(),
            })?;
        tracing::debug!(resource = %resource.key(), "applied");
        Ok(())
    }

    async fn delete_one(&self, resource: &Resource) -> Result<()> {
        let api = self.api_for(resource)?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match api.delete(resource.name(), &params).await {
            Ok(_) => {
                tracing::debug!(resource = %resource.key(), "deleted");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(KubeError::Delete {
                resource: resource.key().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Poll every resource at a fixed interval until all are ready
    async fn poll_ready(&self, resources: &[Resource], wait_for_jobs: bool) -> Result<()> {
        let mut pending: Vec<&Resource> = resources.iter().collect();

        loop {
            let mut still_pending = Vec::new();
            for resource in pending {
                let api = self.api_for(resource)?;
                match api.get_opt(resource.name()).await? {
                    Some(object) => {
                        let value = serde_json::to_value(&object)?;
                        if let Readiness::NotReady(message) =
                            readiness::evaluate(resource.kind(), &value, wait_for_jobs)?
                        {
                            tracing::debug!(%message, "waiting");
                            still_pending.push(resource);
                        }
                    }
                    None => still_pending.push(resource),
                }
            }

            if still_pending.is_empty() {
                return Ok(());
            }
            pending = still_pending;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Watch one resource until it is ready or has failed
    ///
    /// Hooks use the completion rules of [`readiness::evaluate_hook`].
    async fn watch_ready(&self, resource: &Resource, target: Target) -> Result<()> {
        let api = self.api_for(resource)?;
        let kind = resource.kind().to_string();
        let condition_kind = kind.clone();

        // Errors count as "done" so the watch stops and the error surfaces below.
        let condition = move |object: Option<&DynamicObject>| {
            object
                .and_then(|o| serde_json::to_value(o).ok())
                .map(|value| {
                    !matches!(target.check(&condition_kind, &value), Ok(Readiness::NotReady(_)))
                })
                .unwrap_or(false)
        };

        let object = await_condition(api, resource.name(), condition)
            .await
            .map_err(|e| KubeError::WaitFailed(e.to_string()))?
            .ok_or_else(|| KubeError::WaitFailed(format!("{} was deleted", resource.key())))?;

        match target.check(&kind, &serde_json::to_value(&object)?)? {
            Readiness::Ready => Ok(()),
            Readiness::NotReady(message) => Err(KubeError::WaitFailed(message)),
        }
    }
}

/// Readiness rules a watch applies
#[derive(Debug, Clone, Copy)]
enum Target {
    Release { wait_for_jobs: bool },
    Hook,
}

impl Target {
    fn check(self, kind: &str, value: &serde_json::Value) -> Result<Readiness> {
        match self {
            Target::Release { wait_for_jobs } => readiness::evaluate(kind, value, wait_for_jobs),
            Target::Hook => readiness::evaluate_hook(kind, value),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn server_version(&self) -> Result<KubeVersion> {
        let info = self.client.apiserver_version().await?;
        Ok(KubeVersion::new(&info.git_version))
    }

    async fn get(&self, resource: &Resource) -> Result<Option<DynamicObject>> {
        let api = self.api_for(resource)?;
        Ok(api.get_opt(resource.name()).await?)
    }

    async fn apply(&self, resources: &[Resource]) -> Result<()> {
        for resource in resources {
            self.apply_one(resource).await?;
        }
        Ok(())
    }

    async fn delete(&self, resources: &[Resource]) -> Result<()> {
        for resource in resources {
            self.delete_one(resource).await?;
        }
        Ok(())
    }

    async fn wait(
        &self,
        resources: &[Resource],
        strategy: WaitStrategy,
        timeout: Duration,
        wait_for_jobs: bool,
    ) -> Result<()> {
        tracing::debug!(%strategy, count = resources.len(), ?timeout, "waiting for resources");

        let waiting = async {
            match strategy {
                WaitStrategy::None => Ok(()),
                WaitStrategy::LegacyPoll => self.poll_ready(resources, wait_for_jobs).await,
                WaitStrategy::StatusWatch => {
                    let target = Target::Release { wait_for_jobs };
                    try_join_all(resources.iter().map(|r| self.watch_ready(r, target)))
                        .await
                        .map(|_| ())
                }
            }
        };

        tokio::time::timeout(timeout, waiting)
            .await
            .map_err(|_| KubeError::Timeout(format!("{} resource(s) to become ready", resources.len())))?
    }

    async fn watch_until_ready(&self, resource: &Resource, timeout: Duration) -> Result<()> {
        if !matches!(resource.kind(), "Job" | "Pod") {
            return Ok(());
        }

        tokio::time::timeout(timeout, self.watch_ready(resource, Target::Hook))
            .await
            .map_err(|_| KubeError::Timeout(resource.key().to_string()))?
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
