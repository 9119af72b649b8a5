//! Release records
//!
//! A [`Release`] is one immutable version of a named deployment. Field names
//! and status values are part of the stored layout; renaming them breaks
//! existing history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rudder_core::{BundleMetadata, ReleaseStatus, Values};
use serde::{Deserialize, Serialize};

use crate::hooks::Hook;

/// Description written on a record replaced by a newer version
pub const SUPERSEDED_DESCRIPTION: &str = "superseded by new release";

/// A stored release version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Namespace the release is installed into
    pub namespace: String,

    /// Version (1-based, never reused for a name)
    pub version: u32,

    /// Lifecycle information
    pub info: Info,

    /// Metadata of the bundle this version was rendered from
    pub bundle: BundleMetadata,

    /// Effective defaults the manifest was rendered with
    #[serde(default)]
    pub bundle_values: Values,

    /// Caller-supplied overrides
    #[serde(default)]
    pub config: Values,

    /// Rendered manifest (standard resources only)
    #[serde(default)]
    pub manifest: String,

    /// Hooks rendered with this version
    #[serde(default)]
    pub hooks: Vec<Hook>,

    /// User labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Lifecycle information of a release version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub first_deployed: DateTime<Utc>,
    pub last_deployed: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,

    /// Human-readable description of the last transition
    #[serde(default)]
    pub description: String,

    pub status: ReleaseStatus,

    /// Rendered notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Release {
    /// Create a version in status `unknown`
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        version: u32,
        bundle: BundleMetadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version,
            info: Info {
                first_deployed: now,
                last_deployed: now,
                deleted: None,
                description: String::new(),
                status: ReleaseStatus::Unknown,
                notes: None,
            },
            bundle,
            bundle_values: Values::new(),
            config: Values::new(),
            manifest: String::new(),
            hooks: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Set status and description together
    pub fn set_status(&mut self, status: ReleaseStatus, description: impl Into<String>) {
        self.info.status = status;
        self.info.description = description.into();
    }

    pub fn status(&self) -> ReleaseStatus {
        self.info.status
    }

    pub fn mark_superseded(&mut self) {
        self.set_status(ReleaseStatus::Superseded, SUPERSEDED_DESCRIPTION);
    }

    /// Values the manifest was rendered with (defaults overlaid by config)
    pub fn effective_values(&self) -> Values {
        Values::merge_all([&self.bundle_values, &self.config])
    }
}
