//! Annotation parsing with Helm compatibility
//!
//! Rudder reads `rudder.io/*` annotations and falls back to `helm.sh/*`
//! so that bundles migrated from Helm charts keep their hooks.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::hooks::{HookDeletePolicy, HookEvent};

/// Rudder-native annotations
pub mod rudder {
    /// Hook events annotation
    pub const HOOK: &str = "rudder.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "rudder.io/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "rudder.io/hook-delete-policy";
    /// Hook timeout
    pub const HOOK_TIMEOUT: &str = "rudder.io/hook-timeout";
    /// Resource policy (keep on uninstall)
    pub const RESOURCE_POLICY: &str = "rudder.io/resource-policy";
}

/// Helm-compatible annotations (for migration)
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
}

/// Resource policy value that keeps a resource on uninstall
pub const RESOURCE_POLICY_KEEP: &str = "keep";

/// Get annotation value, preferring Rudder over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    rudder_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(rudder_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Does the object declare itself a hook?
pub fn is_hook(annotations: &BTreeMap<String, String>) -> bool {
    get_annotation(annotations, rudder::HOOK, helm::HOOK).is_some()
}

/// Split a comma-separated annotation value
fn parse_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse hook events, ignoring names that are not lifecycle events
pub fn parse_hook_events(annotations: &BTreeMap<String, String>) -> Vec<HookEvent> {
    get_annotation(annotations, rudder::HOOK, helm::HOOK)
        .map(|value| {
            parse_list(value)
                .filter_map(|name| {
                    let event = HookEvent::parse(name);
                    if event.is_none() {
                        tracing::debug!(event = name, "ignoring unknown hook event");
                    }
                    event
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse hook weight (default: 0)
pub fn parse_hook_weight(annotations: &BTreeMap<String, String>) -> i32 {
    get_annotation(annotations, rudder::HOOK_WEIGHT, helm::HOOK_WEIGHT)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse an explicit hook timeout
///
/// Hooks without one use the operation timeout.
pub fn parse_hook_timeout(annotations: &BTreeMap<String, String>) -> Option<Duration> {
    annotations
        .get(rudder::HOOK_TIMEOUT)
        .and_then(|s| parse_duration(s))
}

/// Parse hook delete policies (default: before-hook-creation)
pub fn parse_delete_policies(annotations: &BTreeMap<String, String>) -> Vec<HookDeletePolicy> {
    let policies: Vec<HookDeletePolicy> =
        get_annotation(annotations, rudder::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
            .map(|value| parse_list(value).filter_map(HookDeletePolicy::parse).collect())
            .unwrap_or_default();

    if policies.is_empty() {
        vec![HookDeletePolicy::BeforeHookCreation]
    } else {
        policies
    }
}

/// Check the keep resource policy
pub fn has_keep_policy(annotations: &BTreeMap<String, String>) -> bool {
    get_annotation(annotations, rudder::RESOURCE_POLICY, helm::RESOURCE_POLICY)
        .map(|s| s.trim() == RESOURCE_POLICY_KEEP)
        .unwrap_or(false)
}

/// Parse a duration such as `5m`, `300s`, `1h` or `250ms`
///
/// A bare number is read as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (num_str, unit) = if let Some(stripped) = value.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = value.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped, "h")
    } else {
        (value, "s")
    };

    let num: u64 = num_str.trim().parse().ok()?;

    Some(match unit {
        "ms" => Duration::from_millis(num),
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_get_annotation_prefers_rudder() {
        let annotations = make_annotations(&[
            ("rudder.io/hook", "pre-install"),
            ("helm.sh/hook", "post-install"),
        ]);
        assert_eq!(
            parse_hook_events(&annotations),
            vec![HookEvent::PreInstall]
        );
    }

    #[test]
    fn test_helm_fallback() {
        let annotations = make_annotations(&[
            ("helm.sh/hook", "post-install, pre-delete"),
            ("helm.sh/hook-weight", "-5"),
        ]);
        assert!(is_hook(&annotations));
        assert_eq!(
            parse_hook_events(&annotations),
            vec![HookEvent::PostInstall, HookEvent::PreDelete]
        );
        assert_eq!(parse_hook_weight(&annotations), -5);
    }

    #[test]
    fn test_unknown_events_are_dropped() {
        let annotations = make_annotations(&[("rudder.io/hook", "pre-install,during-install")]);
        assert_eq!(parse_hook_events(&annotations), vec![HookEvent::PreInstall]);
    }

    #[test]
    fn test_delete_policy_default() {
        let empty = BTreeMap::new();
        assert_eq!(
            parse_delete_policies(&empty),
            vec![HookDeletePolicy::BeforeHookCreation]
        );

        let annotations =
            make_annotations(&[("helm.sh/hook-delete-policy", "hook-succeeded,hook-failed")]);
        assert_eq!(
            parse_delete_policies(&annotations),
            vec![HookDeletePolicy::HookSucceeded, HookDeletePolicy::HookFailed]
        );
    }

    #[test]
    fn test_keep_policy() {
        assert!(has_keep_policy(&make_annotations(&[(
            "helm.sh/resource-policy",
            "keep"
        )])));
        assert!(has_keep_policy(&make_annotations(&[(
            "rudder.io/resource-policy",
            "keep"
        )])));
        assert!(!has_keep_policy(&make_annotations(&[(
            "rudder.io/resource-policy",
            "delete"
        )])));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("100ms"), Some(Duration::from_millis(100)));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn test_hook_timeout_is_rudder_only() {
        let annotations = make_annotations(&[("rudder.io/hook-timeout", "90s")]);
        assert_eq!(
            parse_hook_timeout(&annotations),
            Some(Duration::from_secs(90))
        );
        assert_eq!(parse_hook_timeout(&BTreeMap::new()), None);
    }
}
