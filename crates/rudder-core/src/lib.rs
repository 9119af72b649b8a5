//! Rudder Core - Core types shared by the renderer and the release engine
//!
//! This crate provides the foundational types used throughout rudder:
//! - `Bundle`: The versioned package of templates and default values
//! - `Values`: Configuration values with deep merge support
//! - `ReleaseStatus`: The durable release status enum
//! - `TemplateContext`: Template rendering context

pub mod bundle;
pub mod context;
pub mod error;
pub mod status;
pub mod values;

pub use bundle::{Bundle, BundleMetadata, Template};
pub use context::{BundleInfo, Capabilities, KubeVersion, ReleaseInfo, TemplateContext};
pub use error::{CoreError, Result};
pub use status::ReleaseStatus;
pub use values::Values;
