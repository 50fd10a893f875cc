//! Prompt templates
//!
//! `{name}` placeholders are replaced with values from a record. Dotted
//! names walk nested objects (`{author.name}`). Strings are inserted as-is;
//! objects and arrays are rendered as indented outline text.

use crate::error::TemplateError;
use cascade_context::render_value;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

#[allow(clippy::expect_used)]
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}").expect("valid placeholder pattern"));

/// Interpolate `template` with `values`
///
/// # Errors
/// `TemplateError::MissingValue` for the first placeholder without a value.
pub fn render_template(template: &str, values: &Map<String, Value>) -> Result<String, TemplateError> {
    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match lookup(values, name) {
            Some(value) => render_value(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(TemplateError::MissingValue(name)),
        None => Ok(rendered.into_owned()),
    }
}

/// Placeholder names in order of appearance
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

fn lookup<'a>(values: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = values.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    (!current.is_null()).then_some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn interpolates_primitives() {
        let out = render_template(
            "Write about {topic} in {count} words",
            &values(json!({"topic": "borrowing", "count": 100})),
        )
        .unwrap();
        assert_eq!(out, "Write about borrowing in 100 words");
    }

    #[test]
    fn renders_structured_values_as_outline() {
        let out = render_template(
            "Author:\n{author}",
            &values(json!({"author": {"name": "Ada", "skills": ["math"]}})),
        )
        .unwrap();
        assert_eq!(out, "Author:\nname: Ada\nskills:\n  - math");
    }

    #[test]
    fn dotted_paths() {
        let out = render_template("by {author.name}", &values(json!({"author": {"name": "Ada"}}))).unwrap();
        assert_eq!(out, "by Ada");
    }

    #[test]
    fn missing_values_fail() {
        let err = render_template("{a} and {b}", &values(json!({"a": 1}))).unwrap_err();
        assert_eq!(err, TemplateError::MissingValue("b".into()));
        assert!(render_template("{a}", &values(json!({"a": null}))).is_err());
    }

    #[test]
    fn non_placeholder_braces_pass_through() {
        let out = render_template("json: {\"k\": 1} {x}", &values(json!({"x": "y"}))).unwrap();
        assert_eq!(out, "json: {\"k\": 1} y");
    }

    #[test]
    fn lists_placeholders() {
        assert_eq!(placeholders("{a} {b.c} {a}"), vec!["a", "b.c", "a"]);
    }
}
