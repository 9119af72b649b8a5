//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Result type for rendering operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Name template failed to parse or evaluate
    #[error("{0}")]
    NameTemplate(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl From<minijinja::ErrorKind> for TemplateErrorKind {
    fn from(kind: minijinja::ErrorKind) -> Self {
        use minijinja::ErrorKind;
        match kind {
            ErrorKind::UndefinedError => Self::UndefinedVariable,
            ErrorKind::UnknownFilter => Self::UnknownFilter,
            ErrorKind::UnknownFunction => Self::UnknownFunction,
            ErrorKind::SyntaxError => Self::SyntaxError,
            ErrorKind::InvalidOperation => Self::InvalidOperation,
            ErrorKind::NonPrimitive | ErrorKind::NonKey => Self::TypeError,
            _ => Self::Other,
        }
    }
}

/// Template error with source location
///
/// The display form is `<template>:<line>:<column>: <message>` so that callers
/// printing the error see where rendering failed.
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{headline}")]
#[diagnostic(code(rudder::template::render))]
pub struct TemplateError {
    /// Location-prefixed message
    headline: String,

    /// Bare error message
    pub message: String,

    /// Error kind for categorization
    pub kind: TemplateErrorKind,

    /// Template that failed (bundle-qualified)
    pub template: String,

    /// 1-based line, when known
    pub line: Option<usize>,

    /// 1-based column, when known
    pub column: Option<usize>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    /// Build from a MiniJinja error
    ///
    /// `template_name` is the display name of the failing template and
    /// `template_source` its source text, used to compute column and span.
    pub fn from_minijinja(err: &minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = TemplateErrorKind::from(err.kind());
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };

        let line = err.line();
        let (span, column) = match err.range() {
            Some(range) if template_source.is_char_boundary(range.start) => {
                let line_start = template_source[..range.start]
                    .rfind('\n')
                    .map(|i| i + 1)
                    .unwrap_or(0);
                let column = template_source[line_start..range.start].chars().count() + 1;
                (Some(SourceSpan::from(range.start..range.end.max(range.start))), Some(column))
            }
            _ => (line.and_then(|l| line_span(template_source, l)), None),
        };

        let headline = match (line, column) {
            (Some(l), Some(c)) => format!("{}:{}:{}: {}", template_name, l, c, message),
            (Some(l), None) => format!("{}:{}: {}", template_name, l, message),
            _ => format!("{}: {}", template_name, message),
        };

        Self {
            headline,
            message,
            kind,
            template: template_name.to_string(),
            line,
            column,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
        }
    }

    /// Get the error kind
    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Span covering a whole 1-based line
fn line_span(source: &str, line: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (i, text) in source.split_inclusive('\n').enumerate() {
        if i + 1 == line {
            return Some(SourceSpan::from(offset..offset + text.trim_end().len()));
        }
        offset += text.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_span() {
        let source = "a: 1\nbb: 2\nccc: 3\n";
        let span = line_span(source, 2).unwrap();
        assert_eq!(span.offset(), 5);
        assert_eq!(span.len(), 5);
        assert!(line_span(source, 9).is_none());
    }

    #[test]
    fn test_headline_carries_location() {
        let mut env = minijinja::Environment::new();
        let source = "ok: 1\nbad: {{ values.missing.key }}\n";
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
        env.add_template("demo/templates/cm.yaml", source).unwrap();
        let err = env
            .get_template("demo/templates/cm.yaml")
            .unwrap()
            .render(minijinja::context! { values => serde_json::json!({}) })
            .unwrap_err();

        let template_error = TemplateError::from_minijinja(&err, "demo/templates/cm.yaml", source);
        assert_eq!(template_error.kind(), TemplateErrorKind::UndefinedVariable);
        assert_eq!(template_error.line, Some(2));
        assert!(template_error
            .to_string()
            .starts_with("demo/templates/cm.yaml:2:"));
    }
}
