//! Bundle rendering seam
//!
//! The orchestrator renders through [`Renderer`] so the template engine can be
//! swapped out. [`Engine`] is the default implementation.

use rudder_core::{Bundle, TemplateContext};
use rudder_engine::{Engine, EngineError, RenderedBundle};

/// Renders a bundle against a template context
pub trait Renderer: Send + Sync {
    fn render(&self, bundle: &Bundle, context: &TemplateContext) -> Result<RenderedBundle, EngineError>;
}

impl Renderer for Engine {
    fn render(&self, bundle: &Bundle, context: &TemplateContext) -> Result<RenderedBundle, EngineError> {
        self.render_bundle(bundle, context)
    }
}
