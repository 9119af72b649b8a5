//! Release status

use serde::{Deserialize, Serialize};

/// Durable release status
///
/// The serialized names are part of the stored record layout and must not change.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Unknown,
    Deployed,
    Uninstalled,
    Superseded,
    Failed,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Deployed => "deployed",
            Self::Uninstalled => "uninstalled",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
            Self::Uninstalling => "uninstalling",
            Self::PendingInstall => "pending-install",
            Self::PendingUpgrade => "pending-upgrade",
            Self::PendingRollback => "pending-rollback",
        }
    }

    /// Transient states written before remote side effects
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Self::PendingInstall | Self::PendingUpgrade | Self::PendingRollback
        )
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_string(&ReleaseStatus::PendingRollback).unwrap();
        assert_eq!(json, "\"pending-rollback\"");

        let parsed: ReleaseStatus = serde_json::from_str("\"uninstalling\"").unwrap();
        assert_eq!(parsed, ReleaseStatus::Uninstalling);
    }

    #[test]
    fn test_display_matches_serialized_name() {
        for status in [
            ReleaseStatus::Unknown,
            ReleaseStatus::Deployed,
            ReleaseStatus::Superseded,
            ReleaseStatus::PendingInstall,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json.trim_matches('"'), status.to_string());
        }
    }

    #[test]
    fn test_stored_status_names() {
        let names: Vec<&str> = [
            ReleaseStatus::Unknown,
            ReleaseStatus::Deployed,
            ReleaseStatus::Uninstalled,
            ReleaseStatus::Superseded,
            ReleaseStatus::Failed,
            ReleaseStatus::Uninstalling,
            ReleaseStatus::PendingInstall,
            ReleaseStatus::PendingUpgrade,
            ReleaseStatus::PendingRollback,
        ]
        .iter()
        .map(ReleaseStatus::as_str)
        .collect();

        insta::assert_snapshot!(names.join("\n"), @r"
        unknown
        deployed
        uninstalled
        superseded
        failed
        uninstalling
        pending-install
        pending-upgrade
        pending-rollback
        ");
    }

    #[test]
    fn test_pending_states() {
        assert!(ReleaseStatus::PendingUpgrade.is_pending());
        assert!(!ReleaseStatus::Uninstalling.is_pending());
        assert!(!ReleaseStatus::Deployed.is_pending());
    }
}
