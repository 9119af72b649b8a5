//! Release name templates
//!
//! A name template is a one-line expression such as
//! `{{ "web-" ~ randAlphaNum(5) | lower }}` evaluated in a small sandboxed
//! environment. Only random helpers, `now()` and a few string filters are
//! available; values and release data are not.

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

use crate::error::EngineError;
use crate::filters;

const TEMPLATE_NAME: &str = "name-template";

const FUNCTIONS: &[&str] = &["randNumeric", "randAlpha", "randAlphaNum", "now"];

static UNKNOWN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*) is unknown").expect("valid regex"));

static CALL_SITE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([|.]\s*)?\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid regex"));

/// Evaluate a release name template
pub fn evaluate_name_template(template: &str) -> Result<String, EngineError> {
    if let Some(line) = unclosed_action(template) {
        return Err(EngineError::NameTemplate(format!(
            "template: {}:{}: unclosed action",
            TEMPLATE_NAME, line
        )));
    }

    let env = name_environment();
    env.render_str(template, ())
        .map(|name| name.trim().to_string())
        .map_err(|err| map_error(template, &err))
}

fn name_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);

    env.add_function("randNumeric", |n: usize| random_from(b"0123456789", n));
    env.add_function("randAlpha", |n: usize| {
        random_from(b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ", n)
    });
    env.add_function("randAlphaNum", |n: usize| {
        random_from(
            b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
            n,
        )
    });
    env.add_function("now", filters::now);

    env.add_filter("trunc", filters::trunc);
    env.add_filter("trimsuffix", filters::trimsuffix);

    env
}

fn random_from(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

fn map_error(template: &str, err: &minijinja::Error) -> EngineError {
    let line = err.line().unwrap_or(1);
    let detail = err.detail().unwrap_or_default();

    let message = match err.kind() {
        ErrorKind::UnknownFunction => {
            let name = UNKNOWN_NAME
                .captures(detail)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .or_else(|| first_unknown_call(template))
                .unwrap_or_else(|| detail.to_string());
            format!("function \"{}\" not defined", name)
        }
        ErrorKind::SyntaxError if detail.contains("end of input") => "unclosed action".to_string(),
        kind => {
            if detail.is_empty() {
                kind.to_string()
            } else {
                format!("{}: {}", kind, detail)
            }
        }
    };

    EngineError::NameTemplate(format!("template: {}:{}: {}", TEMPLATE_NAME, line, message))
}

/// First called identifier that is neither a known function nor a filter
fn first_unknown_call(template: &str) -> Option<String> {
    CALL_SITE
        .captures_iter(template)
        .filter(|c| c.get(1).is_none())
        .filter_map(|c| c.get(2))
        .map(|m| m.as_str())
        .find(|name| !FUNCTIONS.contains(name))
        .map(str::to_string)
}

/// Line of the first `{{` or `{%` that is never closed
fn unclosed_action(template: &str) -> Option<usize> {
    let mut rest = template;
    let mut consumed = 0;

    loop {
        let open = match (rest.find("{{"), rest.find("{%")) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return None,
        };
        let closer = if rest[open..].starts_with("{{") { "}}" } else { "%}" };

        match rest[open + 2..].find(closer) {
            Some(end) => {
                let next = open + 2 + end + 2;
                consumed += next;
                rest = &rest[next..];
            }
            None => {
                let line = template[..consumed + open].matches('\n').count() + 1;
                return Some(line);
            }
        }
    }
}
