//! Template engine based on MiniJinja

use minijinja::Environment;
use rudder_core::{Bundle, TemplateContext};

use crate::error::{EngineError, Result, TemplateError};
use crate::filters;

/// One rendered template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    /// Bundle-qualified path, e.g. `hello/templates/deployment.yaml`
    pub path: String,

    /// Rendered text (may contain several YAML documents)
    pub content: String,
}

/// Result of rendering a bundle
#[derive(Debug, Clone, Default)]
pub struct RenderedBundle {
    /// Non-empty rendered templates, in declaration order
    pub manifests: Vec<RenderedTemplate>,

    /// Rendered `NOTES.txt`, if the bundle has one
    pub notes: Option<String>,
}

/// Template engine builder
pub struct EngineBuilder {
    strict_mode: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { strict_mode: true }
    }

    /// Set strict mode (fail on undefined variables)
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.strict_mode)
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    strict_mode: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Engine {
    pub fn new(strict_mode: bool) -> Self {
        Self { strict_mode }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();

        if self.strict_mode {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        } else {
            env.set_undefined_behavior(minijinja::UndefinedBehavior::Lenient);
        }

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("b64decode", filters::b64decode);
        env.add_filter("quote", filters::quote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);
        env.add_filter("trunc", filters::trunc);
        env.add_filter("trimprefix", filters::trimprefix);
        env.add_filter("trimsuffix", filters::trimsuffix);

        env.add_function("fail", filters::fail);
        env.add_function("now", filters::now);

        env
    }

    /// Render every template of a bundle
    ///
    /// Partials (`_*`) are loaded so other templates can include them, but are
    /// not rendered on their own. Templates rendering to whitespace are dropped.
    pub fn render_bundle(&self, bundle: &Bundle, context: &TemplateContext) -> Result<RenderedBundle> {
        let mut env = self.create_environment();
        let qualify = |path: &str| format!("{}/{}", bundle.name(), path);

        for template in &bundle.templates {
            env.add_template_owned(template.path.clone(), template.content.clone())
                .map_err(|e| self.template_error(bundle, &e, &template.path))?;
        }

        let ctx = minijinja::context! {
            values => &context.values,
            release => &context.release,
            bundle => &context.bundle,
            capabilities => &context.capabilities,
        };

        let mut rendered = RenderedBundle::default();

        for template in bundle.templates.iter().filter(|t| !t.is_partial()) {
            let tmpl = env
                .get_template(&template.path)
                .map_err(|e| self.template_error(bundle, &e, &template.path))?;
            let output = tmpl
                .render(&ctx)
                .map_err(|e| self.template_error(bundle, &e, &template.path))?;

            if template.is_notes() {
                rendered.notes = Some(output.trim().to_string());
                continue;
            }

            let trimmed = output.trim();
            if trimmed.is_empty() || trimmed == "---" {
                continue;
            }

            rendered.manifests.push(RenderedTemplate {
                path: qualify(&template.path),
                content: output,
            });
        }

        Ok(rendered)
    }

    /// Map a MiniJinja error onto the template that actually failed
    ///
    /// Errors raised inside an included partial name the partial, not the caller.
    fn template_error(&self, bundle: &Bundle, err: &minijinja::Error, fallback: &str) -> EngineError {
        let failing = err.name().unwrap_or(fallback);
        let source = bundle
            .templates
            .iter()
            .find(|t| t.path == failing)
            .map(|t| t.content.as_str())
            .unwrap_or_default();

        EngineError::Template(TemplateError::from_minijinja(
            err,
            &format!("{}/{}", bundle.name(), failing),
            source,
        ))
    }
}

impl RenderedBundle {
    /// Find a rendered template by its bundle-qualified path
    pub fn get(&self, path: &str) -> Option<&RenderedTemplate> {
        self.manifests.iter().find(|m| m.path == path)
    }
}
