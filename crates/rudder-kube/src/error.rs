//! Error types for rudder-kube

use thiserror::Error;

/// Result type for rudder-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while driving a release
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release not found
    ///
    /// Callers branch on this variant (see [`KubeError::is_release_not_found`]),
    /// never on its message.
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// A record with this name and version is already stored
    #[error("release '{name}' version {version} already exists in namespace '{namespace}'")]
    ReleaseAlreadyExists {
        name: String,
        namespace: String,
        version: u32,
    },

    /// The release name could not be resolved or is not a valid name
    #[error("{0}")]
    InvalidReleaseName(String),

    /// Conflicting or unsupported option combination
    #[error("{0}")]
    InvalidOptions(String),

    /// Caller supplied a reserved system label
    #[error(
        "user supplied labels contains system reserved label name. System labels: [{}]",
        .reserved.join(" ")
    )]
    ReservedLabels { reserved: Vec<String> },

    /// Install over a name that still has a live release
    #[error("cannot re-use a name that is still in use")]
    NameInUse { name: String },

    /// Bundle platform constraint does not match the cluster
    #[error("bundle requires kubeVersion: {constraint} which is incompatible with Kubernetes {version}")]
    KubeVersionIncompatible { constraint: String, version: String },

    /// Live object exists but may not be adopted by this release
    #[error("{resource} exists and cannot be imported into the current release: {reason}")]
    OwnershipConflict { resource: String, reason: String },

    /// Precondition failure wrapped with the operation it blocked
    #[error("unable to continue with {operation}: {source}")]
    UnableToContinue {
        operation: String,
        source: Box<KubeError>,
    },

    /// Latest record is still in a pending state
    #[error("another operation (install/upgrade/rollback) is in progress for release '{name}' ({status})")]
    OperationInProgress { name: String, status: String },

    /// No record is eligible to be upgraded
    #[error("\"{name}\" has no deployed releases")]
    NoDeployedRelease { name: String },

    /// Rollback not possible
    #[error("cannot rollback release '{name}': {reason}")]
    RollbackNotPossible { name: String, reason: String },

    /// Uninstall of a release that is already uninstalled, with history kept
    #[error("release \"{name}\" is already uninstalled")]
    AlreadyUninstalled { name: String },

    /// Bundle rendering failed (template diagnostics are kept verbatim)
    #[error(transparent)]
    Render(#[from] rudder_engine::EngineError),

    /// Bundle data could not be used
    #[error("bundle error: {0}")]
    Bundle(#[from] rudder_core::CoreError),

    /// Applying a resource failed
    #[error("failed to apply {resource}: {message}")]
    Apply { resource: String, message: String },

    /// Deleting a resource failed
    #[error("failed to delete {resource}: {message}")]
    Delete { resource: String, message: String },

    /// A hook failed to apply or to become ready
    #[error("{event} hook {path} failed: {message}")]
    HookFailed {
        event: String,
        path: String,
        message: String,
    },

    /// Readiness wait failed
    #[error("{0}")]
    WaitFailed(String),

    /// Timeout
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The caller cancelled the operation
    #[error("context canceled")]
    Cancelled,

    /// Atomic install failed and the release was removed
    #[error("release {name} failed, and has been uninstalled due to atomic being set: {source}")]
    AtomicUninstalled {
        name: String,
        source: Box<KubeError>,
    },

    /// Atomic install failed and removing the release failed too
    #[error(
        "an error occurred while uninstalling the release during atomic rollback. original install error: {original}: {cleanup}"
    )]
    AtomicUninstallFailed {
        original: Box<KubeError>,
        cleanup: Box<KubeError>,
    },

    /// Atomic upgrade failed and the previous version was redeployed
    #[error("release {name} failed, and has been rolled back due to atomic being set: {source}")]
    AtomicRolledBack {
        name: String,
        source: Box<KubeError>,
    },

    /// Atomic upgrade failed and the rollback failed too
    #[error(
        "an error occurred while rolling back the release during atomic rollback. original upgrade error: {original}: {cleanup}"
    )]
    AtomicRollbackFailed {
        original: Box<KubeError>,
        cleanup: Box<KubeError>,
    },

    /// Uninstall finished but some steps failed
    #[error("uninstallation of \"{name}\" completed with {} error(s): {}", .errors.len(), .errors.join("; "))]
    UninstallFailed { name: String, errors: Vec<String> },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check for the release-not-found sentinel
    pub fn is_release_not_found(&self) -> bool {
        matches!(self, KubeError::ReleaseNotFound { .. })
    }

    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Check if the error (or the error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            KubeError::Cancelled => true,
            KubeError::AtomicUninstalled { source, .. }
            | KubeError::AtomicRolledBack { source, .. }
            | KubeError::UnableToContinue { source, .. } => source.is_cancelled(),
            KubeError::AtomicUninstallFailed { original, .. }
            | KubeError::AtomicRollbackFailed { original, .. } => original.is_cancelled(),
            _ => false,
        }
    }
}
