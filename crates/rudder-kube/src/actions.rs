//! Options for install, upgrade, rollback and uninstall

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::wait::WaitStrategy;

/// Dry-run mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DryRunMode {
    /// Apply for real
    #[default]
    None,
    /// No cluster contact at all
    Client,
    /// Cluster may be read, never mutated
    Server,
}

impl DryRunMode {
    pub fn is_dry_run(&self) -> bool {
        !matches!(self, DryRunMode::None)
    }
}

/// Options for install operation
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Explicit release name
    pub release_name: Option<String>,

    /// Generate a name from the bundle source and the current time
    pub generate_name: bool,

    /// Name template evaluated to produce the name
    pub name_template: Option<String>,

    /// Target namespace (orchestrator default when unset)
    pub namespace: Option<String>,

    /// Re-use the name of a release that is not deployed
    pub replace: bool,

    pub dry_run: DryRunMode,

    /// Write rendered manifests here instead of applying them
    pub output_dir: Option<PathBuf>,

    /// Nest output files under a directory named after the release
    pub use_release_name: bool,

    /// Skip lifecycle hooks
    pub disable_hooks: bool,

    /// Wait strategy (orchestrator default when unset)
    pub wait: Option<WaitStrategy>,

    /// Also wait for Jobs to complete
    pub wait_for_jobs: bool,

    /// Timeout for hooks and waits (orchestrator default when unset)
    pub timeout: Option<Duration>,

    /// Uninstall the release again when a post-apply step fails
    pub atomic: bool,

    /// Adopt live objects that carry no ownership markers
    pub take_ownership: bool,

    /// Leave Secret documents out of the returned manifest (dry-run only)
    pub hide_secret: bool,

    /// Description recorded on success
    pub description: Option<String>,

    /// Labels recorded on the release
    pub labels: BTreeMap<String, String>,
}

impl InstallOptions {
    /// Install options with an explicit release name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            release_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Wait with the given strategy and timeout
    pub fn with_wait(mut self, strategy: WaitStrategy, timeout: Duration) -> Self {
        self.wait = Some(strategy);
        self.timeout = Some(timeout);
        self
    }

    /// Enable atomic mode (uninstall on failure)
    pub fn with_atomic(mut self) -> Self {
        self.atomic = true;
        self
    }

    pub fn with_dry_run(mut self, mode: DryRunMode) -> Self {
        self.dry_run = mode;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// How values of the previous release are carried into an upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValuesMode {
    /// Overrides only; the previous overrides are kept when none are given
    Default,
    /// New bundle defaults plus overrides
    Reset,
    /// Previous values with the overrides merged over them
    Reuse,
    /// New bundle defaults, previous overrides, then new overrides
    ResetThenReuse,
}

/// Options for upgrade operation
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Target namespace (orchestrator default when unset)
    pub namespace: Option<String>,

    /// Install the release when it does not exist
    pub install: bool,

    pub dry_run: DryRunMode,
    pub disable_hooks: bool,
    pub wait: Option<WaitStrategy>,
    pub wait_for_jobs: bool,
    pub timeout: Option<Duration>,

    /// Roll back to the previous version when a post-apply step fails
    pub atomic: bool,

    /// Delete resources created by a failed upgrade
    pub cleanup_on_fail: bool,

    pub take_ownership: bool,
    pub hide_secret: bool,
    pub description: Option<String>,

    pub reset_values: bool,
    pub reuse_values: bool,
    pub reset_then_reuse_values: bool,

    /// Label changes; `None` removes the key
    pub labels: BTreeMap<String, Option<String>>,
}

impl UpgradeOptions {
    /// Values mode, by precedence: reset-then-reuse, reuse, reset
    pub fn values_mode(&self) -> ValuesMode {
        if self.reset_then_reuse_values {
            ValuesMode::ResetThenReuse
        } else if self.reuse_values {
            ValuesMode::Reuse
        } else if self.reset_values {
            ValuesMode::Reset
        } else {
            ValuesMode::Default
        }
    }

    /// Install options inherited by an upgrade that installs
    pub fn install_options(&self, name: &str, replace: bool) -> InstallOptions {
        InstallOptions {
            release_name: Some(name.to_string()),
            namespace: self.namespace.clone(),
            replace,
            dry_run: self.dry_run,
            disable_hooks: self.disable_hooks,
            wait: self.wait,
            wait_for_jobs: self.wait_for_jobs,
            timeout: self.timeout,
            atomic: self.atomic,
            take_ownership: self.take_ownership,
            hide_secret: self.hide_secret,
            description: self.description.clone(),
            labels: self
                .labels
                .iter()
                .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
                .collect(),
            ..Default::default()
        }
    }
}

/// Options for rollback operation
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Version to roll back to; 0 means the version before the latest
    pub version: u32,

    pub namespace: Option<String>,
    pub disable_hooks: bool,
    pub dry_run: bool,
    pub wait: Option<WaitStrategy>,
    pub wait_for_jobs: bool,
    pub timeout: Option<Duration>,

    /// Delete resources created by a failed rollback
    pub cleanup_on_fail: bool,
}

impl RollbackOptions {
    pub fn to_version(version: u32) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }
}

/// Options for uninstall operation
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub namespace: Option<String>,

    /// Keep the records, marked `uninstalled`
    pub keep_history: bool,

    pub disable_hooks: bool,
    pub dry_run: bool,
    pub description: Option<String>,
    pub timeout: Option<Duration>,
}
