//! Ownership of live objects
//!
//! Every object applied by a release carries a management label and a pair
//! of annotations naming the release. Before an object that already exists
//! is adopted, its markers are checked against the release.

use kube::api::DynamicObject;

use crate::error::{KubeError, Result};
use crate::manifest::{Resource, ResourceKey};

/// Management label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Management label value
pub const MANAGED_BY: &str = "Rudder";
/// Release name annotation
pub const RELEASE_NAME_ANNOTATION: &str = "meta.rudder.io/release-name";
/// Release namespace annotation
pub const RELEASE_NAMESPACE_ANNOTATION: &str = "meta.rudder.io/release-namespace";

/// Relation between a live object and a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ownership {
    /// No live object
    Absent,
    /// Carries this release's markers
    Owned,
    /// Exists without (complete) ownership markers
    Unowned,
    /// Managed by another release
    OwnedByOther { name: String, namespace: String },
}

/// Classify a live object against a release identity
pub fn classify(live: Option<&DynamicObject>, release_name: &str, release_namespace: &str) -> Ownership {
    let Some(object) = live else {
        return Ownership::Absent;
    };

    let managed = object
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(MANAGED_BY_LABEL))
        .map(|v| v == MANAGED_BY)
        .unwrap_or(false);

    let annotation = |key: &str| {
        object
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .cloned()
    };

    match (
        managed,
        annotation(RELEASE_NAME_ANNOTATION),
        annotation(RELEASE_NAMESPACE_ANNOTATION),
    ) {
        (true, Some(name), Some(namespace)) => {
            if name == release_name && namespace == release_namespace {
                Ownership::Owned
            } else {
                Ownership::OwnedByOther { name, namespace }
            }
        }
        _ => Ownership::Unowned,
    }
}

/// Decide whether an apply over `live` may proceed
///
/// An object managed by a different release is never adopted. An unowned
/// object is adopted only with `take_ownership`.
pub fn check(
    live: Option<&DynamicObject>,
    key: &ResourceKey,
    release_name: &str,
    release_namespace: &str,
    take_ownership: bool,
) -> Result<()> {
    let ownership = classify(live, release_name, release_namespace);
    tracing::debug!(resource = %key, ?ownership, "ownership check");

    match ownership {
        Ownership::Absent | Ownership::Owned => Ok(()),
        Ownership::Unowned if take_ownership => Ok(()),
        Ownership::Unowned => Err(KubeError::OwnershipConflict {
            resource: key.to_string(),
            reason: format!(
                "invalid ownership metadata; {}; set take-ownership to adopt it",
                missing_markers(live, release_name, release_namespace)
            ),
        }),
        Ownership::OwnedByOther { name, namespace } => Err(KubeError::OwnershipConflict {
            resource: key.to_string(),
            reason: format!(
                "it is owned by release \"{}\" in namespace \"{}\"",
                name, namespace
            ),
        }),
    }
}

fn missing_markers(live: Option<&DynamicObject>, release_name: &str, release_namespace: &str) -> String {
    let Some(object) = live else {
        return String::new();
    };
    let labels = object.metadata.labels.clone().unwrap_or_default();
    let annotations = object.metadata.annotations.clone().unwrap_or_default();

    let mut problems = Vec::new();
    if labels.get(MANAGED_BY_LABEL).map(String::as_str) != Some(MANAGED_BY) {
        problems.push(format!(
            "label validation error: missing key \"{}\": must be set to \"{}\"",
            MANAGED_BY_LABEL, MANAGED_BY
        ));
    }
    for (key, expected) in [
        (RELEASE_NAME_ANNOTATION, release_name),
        (RELEASE_NAMESPACE_ANNOTATION, release_namespace),
    ] {
        if !annotations.contains_key(key) {
            problems.push(format!(
                "annotation validation error: missing key \"{}\": must be set to \"{}\"",
                key, expected
            ));
        }
    }
    problems.join("; ")
}

/// Write this release's markers onto a resource before apply
pub fn stamp(resource: &mut Resource, release_name: &str, release_namespace: &str) {
    let metadata = &mut resource.object.metadata;
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let annotations = metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(RELEASE_NAME_ANNOTATION.to_string(), release_name.to_string());
    annotations.insert(
        RELEASE_NAMESPACE_ANNOTATION.to_string(),
        release_namespace.to_string(),
    );
}
