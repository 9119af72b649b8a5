//! Bundle definition
//!
//! A bundle is an already-loaded package: metadata, ordered templates and
//! default values. Loading bundles from disk or registries happens upstream.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::context::KubeVersion;
use crate::error::{CoreError, Result};
use crate::values::Values;

/// A loaded bundle ready to be rendered
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Bundle metadata
    pub metadata: BundleMetadata,

    /// Templates in declaration order
    #[serde(default)]
    pub templates: Vec<Template>,

    /// Default values shipped with the bundle
    #[serde(default)]
    pub values: Values,

    /// Where the bundle was loaded from (used to derive generated names)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Bundle metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Bundle name
    pub name: String,

    /// Bundle version (SemVer)
    pub version: Version,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Supported platform version constraint (e.g. ">=1.21.0")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
}

/// A single template file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Path relative to the bundle root, e.g. `templates/deployment.yaml`
    pub path: String,

    /// Raw template source
    pub content: String,
}

impl Template {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// File name without directories
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Helper partials start with `_` and are never rendered on their own
    pub fn is_partial(&self) -> bool {
        self.file_name().starts_with('_')
    }

    /// `NOTES.txt` produces the release notes instead of a manifest
    pub fn is_notes(&self) -> bool {
        self.file_name().eq_ignore_ascii_case("notes.txt")
    }
}

impl Bundle {
    /// Create a bundle with no templates
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            metadata: BundleMetadata {
                name: name.into(),
                version,
                description: None,
                app_version: None,
                kube_version: None,
            },
            templates: Vec::new(),
            values: Values::new(),
            source: None,
        }
    }

    /// Add a template
    pub fn with_template(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.templates.push(Template::new(path, content));
        self
    }

    /// Set default values
    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Set the platform version constraint
    pub fn with_kube_version(mut self, constraint: impl Into<String>) -> Self {
        self.metadata.kube_version = Some(constraint.into());
        self
    }

    /// Set the source location
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl BundleMetadata {
    /// Check the declared platform constraint against a cluster version
    ///
    /// Returns `Ok(true)` when no constraint is declared.
    pub fn supports_kube_version(&self, kube: &KubeVersion) -> Result<bool> {
        let Some(constraint) = self.kube_version.as_deref() else {
            return Ok(true);
        };

        let version = parse_cluster_version(&kube.version)?;

        for alternative in constraint.split("||") {
            let req = parse_constraint(alternative).map_err(|e| {
                CoreError::InvalidKubeConstraint {
                    constraint: constraint.to_string(),
                    message: e.to_string(),
                }
            })?;
            if req.matches(&version) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Parse a cluster version such as `v1.31.2-gke.1200` leniently
///
/// Pre-release and build metadata are dropped so that vendor suffixes
/// do not exclude the cluster from plain range constraints.
fn parse_cluster_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let core = trimmed
        .split(['-', '+'])
        .next()
        .unwrap_or(trimmed);

    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    Ok(Version::parse(&parts[..3].join("."))?)
}

/// Accept space-separated comparators (`>= 1.20 < 1.30`) as well as commas
fn parse_constraint(raw: &str) -> std::result::Result<VersionReq, semver::Error> {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;

    for token in raw.split([' ', ',']).filter(|t| !t.is_empty()) {
        let is_bare_op = token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^' | '!'));
        if is_bare_op {
            pending_op = Some(token);
            continue;
        }
        let token = token.trim_start_matches('v');
        match pending_op.take() {
            Some(op) => comparators.push(format!("{}{}", op, token)),
            None => comparators.push(token.to_string()),
        }
    }

    VersionReq::parse(&comparators.join(", "))
}
