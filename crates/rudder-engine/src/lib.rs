//! Rudder Engine - Jinja2 templating for release bundles
//!
//! This crate provides:
//! - A MiniJinja-based bundle renderer with Kubernetes-oriented filters
//! - Template errors that keep their line/column location
//! - The restricted name-template evaluator used to generate release names

pub mod engine;
pub mod error;
pub mod filters;
pub mod name_template;

pub use engine::{Engine, EngineBuilder, RenderedBundle, RenderedTemplate};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use name_template::evaluate_name_template;
