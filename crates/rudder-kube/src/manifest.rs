//! Manifest splitting and assembly
//!
//! Rendered templates may hold several YAML documents. Each document becomes
//! either a [`Hook`] (when annotated as one) or a [`Resource`]. Stored release
//! manifests use `---` separators and a `# Source: <path>` header per document.

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use rudder_engine::RenderedBundle;

use crate::annotations;
use crate::error::{KubeError, Result};
use crate::hooks::Hook;

const SOURCE_PREFIX: &str = "# Source:";

/// Kinds that are never namespaced
const CLUSTER_SCOPED: &[&str] = &[
    "APIService",
    "CSIDriver",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
];

/// Creation order; kinds not listed go last, uninstall runs in reverse
const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
];

/// One manifest document resolved to a Kubernetes object
#[derive(Debug, Clone)]
pub struct Resource {
    /// Bundle-qualified template path the document came from
    pub source: String,

    /// Document text as rendered
    pub content: String,

    /// Parsed object (namespace defaulted for namespaced kinds)
    pub object: DynamicObject,
}

/// Identity of a live object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// API group (empty for the core group)
    pub group: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} \"{}\" in namespace \"{}\"", self.kind, self.name, ns),
            None => write!(f, "{} \"{}\"", self.kind, self.name),
        }
    }
}

impl ResourceKey {
    /// Key of an object as returned by the cluster
    pub fn from_object(object: &DynamicObject) -> Option<Self> {
        let types = object.types.as_ref()?;
        Some(Self {
            group: api_group(&types.api_version).to_string(),
            kind: types.kind.clone(),
            namespace: object.metadata.namespace.clone(),
            name: object.metadata.name.clone()?,
        })
    }
}

impl Resource {
    /// Parse one document
    ///
    /// `default_namespace` is filled in for namespaced kinds that omit it.
    pub fn parse(source: &str, content: &str, default_namespace: &str) -> Result<Self> {
        let mut object: DynamicObject = serde_yaml::from_str(content)
            .map_err(|e| KubeError::InvalidManifest(format!("{}: {}", source, e)))?;

        let kind = match object.types.as_ref() {
            Some(types) if !types.kind.is_empty() => types.kind.clone(),
            _ => {
                return Err(KubeError::InvalidManifest(format!(
                    "{}: object is missing apiVersion or kind",
                    source
                )));
            }
        };

        if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
            return Err(KubeError::InvalidManifest(format!(
                "{}: {} is missing metadata.name",
                source, kind
            )));
        }

        if object.metadata.namespace.is_none() && !is_cluster_scoped(&kind) {
            object.metadata.namespace = Some(default_namespace.to_string());
        }

        Ok(Self {
            source: source.to_string(),
            content: content.trim_end().to_string(),
            object,
        })
    }

    pub fn kind(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.kind.as_str())
            .unwrap_or_default()
    }

    pub fn api_version(&self) -> &str {
        self.object
            .types
            .as_ref()
            .map(|t| t.api_version.as_str())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.object.metadata.namespace.as_deref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.object.metadata.annotations.as_ref()
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            group: api_group(self.api_version()).to_string(),
            kind: self.kind().to_string(),
            namespace: self.namespace().map(str::to_string),
            name: self.name().to_string(),
        }
    }

    /// Annotated `resource-policy: keep`
    pub fn has_keep_policy(&self) -> bool {
        self.annotations()
            .map(annotations::has_keep_policy)
            .unwrap_or(false)
    }

    fn install_rank(&self) -> usize {
        INSTALL_ORDER
            .iter()
            .position(|k| *k == self.kind())
            .unwrap_or(INSTALL_ORDER.len())
    }
}

/// Rendered output divided into hooks and ordinary resources
#[derive(Debug, Clone, Default)]
pub struct SplitManifest {
    /// Hooks in manifest order
    pub hooks: Vec<Hook>,

    /// Resources in install order
    pub resources: Vec<Resource>,
}

/// Split a rendered bundle into hooks and resources
pub fn split_rendered(rendered: &RenderedBundle, namespace: &str) -> Result<SplitManifest> {
    let mut split = SplitManifest::default();

    for template in &rendered.manifests {
        for (header, content) in split_documents(&template.content) {
            let source = header.unwrap_or_else(|| template.path.clone());
            let resource = Resource::parse(&source, &content, namespace)?;

            let is_hook = resource
                .annotations()
                .map(annotations::is_hook)
                .unwrap_or(false);

            if is_hook {
                split.hooks.push(Hook::from_resource(&resource));
            } else {
                split.resources.push(resource);
            }
        }
    }

    sort_for_install(&mut split.resources);
    Ok(split)
}

/// Parse a stored release manifest back into resources
pub fn parse_stored(manifest: &str, namespace: &str) -> Result<Vec<Resource>> {
    split_documents(manifest)
        .into_iter()
        .map(|(header, content)| {
            let source = header.unwrap_or_else(|| "manifest".to_string());
            Resource::parse(&source, &content, namespace)
        })
        .collect()
}

/// Join resources into the stored manifest layout
///
/// With `hide_secrets`, `Secret` documents are left out.
pub fn assemble(resources: &[Resource], hide_secrets: bool) -> String {
    let mut out = String::new();
    for resource in resources {
        if hide_secrets && resource.kind() == "Secret" {
            continue;
        }
        out.push_str(&format!(
            "---\n{} {}\n{}\n",
            SOURCE_PREFIX, resource.source, resource.content
        ));
    }
    out
}

/// Stable sort by creation order
pub fn sort_for_install(resources: &mut [Resource]) {
    resources.sort_by_key(Resource::install_rank);
}

/// Stable sort by deletion order
pub fn sort_for_uninstall(resources: &mut [Resource]) {
    resources.sort_by_key(|r| std::cmp::Reverse(r.install_rank()));
}

/// Split text on `---` lines, returning each non-empty document with its
/// `# Source:` header (if any) removed
pub fn split_documents(text: &str) -> Vec<(Option<String>, String)> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if line.starts_with("---") {
            push_document(&mut docs, &current);
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, &current);

    docs
}

fn push_document(docs: &mut Vec<(Option<String>, String)>, raw: &str) {
    let only_comments = raw
        .lines()
        .all(|l| l.trim().is_empty() || l.trim_start().starts_with('#'));
    if only_comments {
        return;
    }

    let mut header = None;
    let mut body = String::new();
    for line in raw.lines() {
        if header.is_none()
            && body.trim().is_empty()
            && let Some(path) = line.trim().strip_prefix(SOURCE_PREFIX)
        {
            header = Some(path.trim().to_string());
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }

    docs.push((header, body.trim_matches('\n').to_string()));
}

fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED.contains(&kind)
}

fn api_group(api_version: &str) -> &str {
    api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or("")
}
