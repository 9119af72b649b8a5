//! Readiness evaluation for live objects
//!
//! Both wait strategies of the kube-backed client share these rules. An
//! object is evaluated from its JSON form (as served by the API server),
//! converted into the typed `k8s-openapi` struct for the kinds that have
//! readiness semantics.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{KubeError, Result};

/// Readiness of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet, with a progress message
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

/// Evaluate an applied resource
///
/// Jobs only count when `wait_for_jobs` is set. A failed Job is an error
/// rather than "not ready", so waits stop early.
pub fn evaluate(kind: &str, object: &JsonValue, wait_for_jobs: bool) -> Result<Readiness> {
    match kind {
        "Deployment" => deployment(typed(object)?),
        "StatefulSet" => statefulset(typed(object)?),
        "ReplicaSet" => replicaset(typed(object)?),
        "DaemonSet" => daemonset(typed(object)?),
        "Pod" => pod(typed(object)?, false),
        "PersistentVolumeClaim" => pvc(typed(object)?),
        "Service" => service(typed(object)?),
        "Job" if wait_for_jobs => job(typed(object)?),
        _ => Ok(Readiness::Ready),
    }
}

/// Evaluate a hook object
///
/// Hooks that run to completion (Jobs and Pods) must finish successfully.
/// Any other kind is ready once it exists.
pub fn evaluate_hook(kind: &str, object: &JsonValue) -> Result<Readiness> {
    match kind {
        "Job" => job(typed(object)?),
        "Pod" => pod(typed(object)?, true),
        _ => Ok(Readiness::Ready),
    }
}

fn typed<T: DeserializeOwned>(object: &JsonValue) -> Result<T> {
    serde_json::from_value(object.clone()).map_err(KubeError::from)
}

fn name_of(metadata: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> &str {
    metadata.name.as_deref().unwrap_or_default()
}

fn deployment(d: Deployment) -> Result<Readiness> {
    let name = name_of(&d.metadata);
    if d.spec.as_ref().map(|s| s.paused == Some(true)).unwrap_or(false) {
        return Ok(Readiness::Ready);
    }

    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = d.status.as_ref() else {
        return Ok(Readiness::NotReady(format!("Deployment {} has no status yet", name)));
    };

    if status.observed_generation.unwrap_or(0) < d.metadata.generation.unwrap_or(0) {
        return Ok(Readiness::NotReady(format!(
            "Deployment {} spec update not observed yet",
            name
        )));
    }

    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    if updated < desired || ready < desired {
        return Ok(Readiness::NotReady(format!(
            "Deployment {}: {}/{} updated, {}/{} ready",
            name, updated, desired, ready, desired
        )));
    }
    Ok(Readiness::Ready)
}

fn statefulset(s: StatefulSet) -> Result<Readiness> {
    let name = name_of(&s.metadata);
    let desired = s.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = s.status.as_ref() else {
        return Ok(Readiness::NotReady(format!("StatefulSet {} has no status yet", name)));
    };

    if status.observed_generation.unwrap_or(0) < s.metadata.generation.unwrap_or(0) {
        return Ok(Readiness::NotReady(format!(
            "StatefulSet {} spec update not observed yet",
            name
        )));
    }

    let ready = status.ready_replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    if ready < desired || updated < desired {
        return Ok(Readiness::NotReady(format!(
            "StatefulSet {}: {}/{} ready, {}/{} updated",
            name, ready, desired, updated, desired
        )));
    }
    Ok(Readiness::Ready)
}

fn replicaset(r: ReplicaSet) -> Result<Readiness> {
    let name = name_of(&r.metadata);
    let desired = r.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let Some(status) = r.status.as_ref() else {
        return Ok(Readiness::NotReady(format!("ReplicaSet {} has no status yet", name)));
    };

    if status.observed_generation.unwrap_or(0) < r.metadata.generation.unwrap_or(0) {
        return Ok(Readiness::NotReady(format!(
            "ReplicaSet {} spec update not observed yet",
            name
        )));
    }

    let ready = status.ready_replicas.unwrap_or(0);
    if ready < desired {
        return Ok(Readiness::NotReady(format!(
            "ReplicaSet {}: {}/{} ready",
            name, ready, desired
        )));
    }
    Ok(Readiness::Ready)
}

fn daemonset(d: DaemonSet) -> Result<Readiness> {
    let name = name_of(&d.metadata);
    let Some(status) = d.status.as_ref() else {
        return Ok(Readiness::NotReady(format!("DaemonSet {} has no status yet", name)));
    };

    if status.observed_generation.unwrap_or(0) < d.metadata.generation.unwrap_or(0) {
        return Ok(Readiness::NotReady(format!(
            "DaemonSet {} spec update not observed yet",
            name
        )));
    }

    let desired = status.desired_number_scheduled;
    let updated = status.updated_number_scheduled.unwrap_or(0);
    let ready = status.number_ready;
    if updated < desired || ready < desired {
        return Ok(Readiness::NotReady(format!(
            "DaemonSet {}: {}/{} updated, {}/{} ready",
            name, updated, desired, ready, desired
        )));
    }
    Ok(Readiness::Ready)
}

fn pod(p: Pod, must_complete: bool) -> Result<Readiness> {
    let name = name_of(&p.metadata).to_string();
    let status = p.status.unwrap_or_default();
    let phase = status.phase.as_deref().unwrap_or("Pending");

    match phase {
        "Succeeded" => return Ok(Readiness::Ready),
        "Failed" => {
            return Err(KubeError::WaitFailed(format!(
                "pod {} failed: {}",
                name,
                status.message.unwrap_or_default()
            )));
        }
        _ => {}
    }

    if must_complete {
        return Ok(Readiness::NotReady(format!("pod {} is {}", name, phase)));
    }

    let ready = status
        .conditions
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");

    if ready {
        Ok(Readiness::Ready)
    } else {
        Ok(Readiness::NotReady(format!("pod {} is not ready", name)))
    }
}

fn pvc(claim: PersistentVolumeClaim) -> Result<Readiness> {
    let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
    if phase == Some("Bound") {
        Ok(Readiness::Ready)
    } else {
        Ok(Readiness::NotReady(format!(
            "PersistentVolumeClaim {} is not bound",
            name_of(&claim.metadata)
        )))
    }
}

fn service(s: Service) -> Result<Readiness> {
    let is_load_balancer = s
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some("LoadBalancer");
    if !is_load_balancer {
        return Ok(Readiness::Ready);
    }

    let has_ingress = s
        .status
        .as_ref()
        .and_then(|st| st.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|ingress| !ingress.is_empty())
        .unwrap_or(false);

    if has_ingress {
        Ok(Readiness::Ready)
    } else {
        Ok(Readiness::NotReady(format!(
            "Service {} has no load balancer ingress",
            name_of(&s.metadata)
        )))
    }
}

fn job(j: Job) -> Result<Readiness> {
    let name = name_of(&j.metadata).to_string();
    let status = j.status.unwrap_or_default();
    let conditions = status.conditions.unwrap_or_default();

    if let Some(failed) = conditions
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
    {
        return Err(KubeError::WaitFailed(format!(
            "job {} failed: {}",
            name,
            failed.reason.clone().unwrap_or_else(|| "BackoffLimitExceeded".to_string())
        )));
    }

    if conditions
        .iter()
        .any(|c| c.type_ == "Complete" && c.status == "True")
    {
        return Ok(Readiness::Ready);
    }

    Ok(Readiness::NotReady(format!(
        "job {}: {} active, {} succeeded",
        name,
        status.active.unwrap_or(0),
        status.succeeded.unwrap_or(0)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(generation: i64, observed: i64, updated: i32, ready: i32) -> JsonValue {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "generation": generation },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "web" } },
                "template": { "metadata": { "labels": { "app": "web" } } }
            },
            "status": {
                "observedGeneration": observed,
                "updatedReplicas": updated,
                "readyReplicas": ready
            }
        })
    }

    #[test]
    fn test_deployment_rollout() {
        assert!(evaluate("Deployment", &deployment(2, 2, 2, 2), false).unwrap().is_ready());

        let stale = evaluate("Deployment", &deployment(3, 2, 2, 2), false).unwrap();
        assert!(matches!(stale, Readiness::NotReady(m) if m.contains("not observed")));

        let partial = evaluate("Deployment", &deployment(2, 2, 2, 1), false).unwrap();
        assert_eq!(
            partial,
            Readiness::NotReady("Deployment web: 2/2 updated, 1/2 ready".to_string())
        );
    }

    fn job(condition: Option<&str>) -> JsonValue {
        let conditions = match condition {
            Some(kind) => json!([{ "type": kind, "status": "True", "reason": "BackoffLimitExceeded" }]),
            None => json!([]),
        };
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": "migrate" },
            "spec": { "template": {} },
            "status": { "active": 1, "conditions": conditions }
        })
    }

    #[test]
    fn test_jobs_only_counted_when_requested() {
        assert!(evaluate("Job", &job(None), false).unwrap().is_ready());
        assert!(!evaluate("Job", &job(None), true).unwrap().is_ready());
        assert!(evaluate("Job", &job(Some("Complete")), true).unwrap().is_ready());

        let err = evaluate("Job", &job(Some("Failed")), true).unwrap_err();
        assert!(err.to_string().contains("job migrate failed"));
    }

    #[test]
    fn test_hook_pod_must_complete() {
        let running = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "smoke" },
            "status": {
                "phase": "Running",
                "conditions": [{ "type": "Ready", "status": "True" }]
            }
        });
        assert!(evaluate("Pod", &running, false).unwrap().is_ready());
        assert!(!evaluate_hook("Pod", &running).unwrap().is_ready());
    }

    #[test]
    fn test_load_balancer_needs_ingress() {
        let pending = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "edge" },
            "spec": { "type": "LoadBalancer" },
            "status": { "loadBalancer": {} }
        });
        assert!(!evaluate("Service", &pending, false).unwrap().is_ready());

        let cluster_ip = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": "internal" },
            "spec": { "type": "ClusterIP" }
        });
        assert!(evaluate("Service", &cluster_ip, false).unwrap().is_ready());
    }

    #[test]
    fn test_unknown_kinds_are_ready() {
        let cm = json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } });
        assert!(evaluate("ConfigMap", &cm, true).unwrap().is_ready());
        assert!(evaluate_hook("ConfigMap", &cm).unwrap().is_ready());
    }
}
