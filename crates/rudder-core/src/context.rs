//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::bundle::BundleMetadata;
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// User values (merged)
    pub values: JsonValue,

    /// Release information
    pub release: ReleaseInfo,

    /// Bundle metadata
    pub bundle: BundleInfo,

    /// Cluster capabilities
    pub capabilities: Capabilities,
}

/// Release information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub is_install: bool,
    pub is_upgrade: bool,
    pub service: String,
}

impl ReleaseInfo {
    /// Release info for a new install (or a replace of an old name)
    pub fn for_install(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            is_install: true,
            is_upgrade: false,
            service: "Rudder".to_string(),
        }
    }

    /// Release info for an upgrade
    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            is_install: false,
            is_upgrade: true,
            ..Self::for_install(name, namespace, revision)
        }
    }
}

/// Bundle information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&BundleMetadata> for BundleInfo {
    fn from(meta: &BundleMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version
    pub kube_version: KubeVersion,

    /// Available API versions
    pub api_versions: Vec<String>,
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        // Used when no cluster is contacted (client-only rendering)
        Self {
            version: "v1.31.0".to_string(),
            major: "1".to_string(),
            minor: "31".to_string(),
        }
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let mut parts = version.split('.');
        let major = parts.next().unwrap_or("1").to_string();
        let minor = parts
            .next()
            .map(|m| m.trim_end_matches('+').to_string())
            .unwrap_or_else(|| "0".to_string());

        Self {
            version: format!("v{}", version),
            major,
            minor,
        }
    }
}

impl std::fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.version)
    }
}

impl TemplateContext {
    /// Create a new template context
    pub fn new(values: Values, release: ReleaseInfo, bundle: &BundleMetadata) -> Self {
        Self {
            values: values.into_inner(),
            release,
            bundle: BundleInfo::from(bundle),
            capabilities: Capabilities::default(),
        }
    }

    /// Set capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}
