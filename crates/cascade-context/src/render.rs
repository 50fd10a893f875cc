//! Readable text rendering for structured values
//!
//! Objects render as indented `key: value` lines and arrays as `- item`
//! lines; primitives render inline with strings unquoted.

use crate::entity::Entity;
use serde_json::Value;
use std::fmt::Write;

const INDENT: &str = "  ";

/// Render any JSON value as readable text
#[must_use]
pub fn render_value(value: &Value) -> String {
    render_value_indented(value, 0)
}

/// Render with every line prefixed by `level` indentation steps
#[must_use]
pub fn render_value_indented(value: &Value, level: usize) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) if !map.is_empty() => render_object(&mut out, map.iter(), level),
        Value::Array(items) if !items.is_empty() => render_array(&mut out, items, level),
        other => {
            out.push_str(&INDENT.repeat(level));
            out.push_str(&inline(other));
        }
    }
    while out.ends_with('\n') {
        out.pop();
    }
    out
}

/// Render an entity header followed by its fields
#[must_use]
pub fn render_entity(entity: &Entity, level: usize) -> String {
    let pad = INDENT.repeat(level);
    let mut out = format!("{pad}- {} {}", entity.type_name, entity.id);
    if !entity.fields.is_empty() {
        out.push('\n');
        let mut body = String::new();
        render_object(&mut body, entity.fields.iter(), level + 1);
        out.push_str(body.trim_end_matches('\n'));
    }
    out
}

fn inline(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) => "[]".to_string(),
        Value::Object(_) => "{}".to_string(),
    }
}

fn is_nested(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => false,
    }
}

fn render_object<'a>(
    out: &mut String,
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
    level: usize,
) {
    let pad = INDENT.repeat(level);
    for (key, value) in entries {
        if is_nested(value) {
            let _ = writeln!(out, "{pad}{key}:");
            render_nested(out, value, level + 1);
        } else {
            let _ = writeln!(out, "{pad}{key}: {}", inline(value));
        }
    }
}

fn render_array(out: &mut String, items: &[Value], level: usize) {
    let pad = INDENT.repeat(level);
    for item in items {
        if is_nested(item) {
            let _ = writeln!(out, "{pad}-");
            render_nested(out, item, level + 1);
        } else {
            let _ = writeln!(out, "{pad}- {}", inline(item));
        }
    }
}

fn render_nested(out: &mut String, value: &Value, level: usize) {
    match value {
        Value::Object(map) => render_object(out, map.iter(), level),
        Value::Array(items) => render_array(out, items, level),
        other => {
            let _ = writeln!(out, "{}{}", INDENT.repeat(level), inline(other));
        }
    }
}
