//! Rudder Kube - Release lifecycle engine
//!
//! This crate drives releases of rendered bundles against a Kubernetes cluster:
//! - **Orchestrator**: install, upgrade, rollback and uninstall state machines
//! - **Hooks**: weight-ordered lifecycle hooks with deletion policies
//! - **Ownership**: provenance checks before adopting live objects
//! - **Wait**: cancellable readiness waits (legacy poll or status watch)
//! - **Storage**: immutable, versioned release records behind a driver trait
//! - **Annotations**: Helm-compatible annotation parsing with Rudder keys

pub mod actions;
pub mod annotations;
pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod naming;
pub mod orchestrator;
pub mod ownership;
pub mod readiness;
pub mod release;
pub mod render;
pub mod storage;
pub mod wait;

pub use actions::{
    DryRunMode, InstallOptions, RollbackOptions, UninstallOptions, UpgradeOptions, ValuesMode,
};
pub use client::{FakeResourceClient, KubeResourceClient, ResourceClient};
pub use config::OrchestratorConfig;
pub use error::{KubeError, Result};
pub use hooks::{Hook, HookDeletePolicy, HookEvent, HookExecution, HookExecutor, HookRunPhase};
pub use manifest::{Resource, ResourceKey, SplitManifest};
pub use orchestrator::{Orchestrator, UninstallResponse};
pub use ownership::Ownership;
pub use release::{Info, Release};
pub use render::Renderer;
pub use storage::{CompressionMethod, MemoryDriver, OperationCounts, StorageDriver, SYSTEM_LABELS};
pub use wait::{WaitCoordinator, WaitStrategy};
