//! Release name resolution

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::actions::InstallOptions;
use crate::error::{KubeError, Result};

/// Longest release name accepted
pub const MAX_RELEASE_NAME_LEN: usize = 53;

static DNS1123_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));

/// Check a release name is a DNS-1123 label of at most 53 characters
pub fn validate_release_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KubeError::InvalidReleaseName("no name provided".to_string()));
    }
    if name.len() > MAX_RELEASE_NAME_LEN || !DNS1123_LABEL.is_match(name) {
        return Err(KubeError::InvalidReleaseName(format!(
            "invalid release name \"{}\": names must be lowercase alphanumeric or '-', start and end with an alphanumeric character, and be at most {} characters",
            name, MAX_RELEASE_NAME_LEN
        )));
    }
    Ok(())
}

/// Generated name `<base>-<unix seconds>`
///
/// `base` is the last path component of the bundle source, cut at its first
/// `.`; it falls back to `chart` when nothing usable is left.
pub fn generated_name(source: Option<&str>, now: DateTime<Utc>) -> String {
    let base = source
        .map(|s| s.trim_end_matches('/'))
        .and_then(|s| s.rsplit('/').next())
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| s.split('.').next().unwrap_or(s))
        .filter(|s| !s.is_empty())
        .unwrap_or("chart");

    format!("{}-{}", base, now.timestamp())
}

/// Resolve the release name from the install options
pub fn resolve_release_name(options: &InstallOptions, source: Option<&str>) -> Result<String> {
    let explicit = options.release_name.as_deref().filter(|n| !n.is_empty());

    if explicit.is_some() && options.name_template.is_some() {
        return Err(KubeError::InvalidReleaseName(
            "cannot set name-template and also specify a name".to_string(),
        ));
    }
    if explicit.is_some() && options.generate_name {
        return Err(KubeError::InvalidReleaseName(
            "cannot set generate-name and also specify a name".to_string(),
        ));
    }

    let name = if let Some(template) = options.name_template.as_deref() {
        rudder_engine::evaluate_name_template(template)?
    } else if options.generate_name {
        generated_name(source, Utc::now())
    } else if let Some(name) = explicit {
        name.to_string()
    } else {
        return Err(KubeError::InvalidReleaseName(
            "must either provide a name or specify generate-name".to_string(),
        ));
    };

    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(KubeError::InvalidReleaseName("no name provided".to_string()));
    }
    Ok(name)
}
