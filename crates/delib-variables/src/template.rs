//! `{{variable}}` references in stage and prompt text.
//!
//! Supported forms: `{{name}}`, `{{name.property}}`, `{{name.0}}` and the
//! expanded permutation names `{{name_1}}`. Section tags (`{{#name}}`,
//! `{{^name}}`) count as references but are never substituted.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::codec::safe_parse_json;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([#^&/]?)\s*([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("reference pattern is valid")
});

/// Every distinct reference path, in order of first appearance.
pub fn extract_variable_references(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in REFERENCE.captures_iter(template) {
        if &caps[1] == "/" {
            continue;
        }
        let path = caps[2].to_string();
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

/// Base names referenced by `template` that `variables` does not define.
pub fn missing_template_variables(
    template: &str,
    variables: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut missing: Vec<String> = Vec::new();
    for reference in extract_variable_references(template) {
        let base = reference.split('.').next().unwrap_or_default();
        if !variables.contains_key(base) && !missing.iter().any(|m| m == base) {
            missing.push(base.to_string());
        }
    }
    missing
}

/// Substitute references with values from a variable map of serialised
/// values. Strings render bare; other values render as JSON. References
/// that do not resolve are left in place.
pub fn render_template(template: &str, variables: &BTreeMap<String, String>) -> String {
    REFERENCE
        .replace_all(template, |caps: &Captures| {
            let sigil = &caps[1];
            if !sigil.is_empty() && sigil != "&" {
                return caps[0].to_string();
            }
            match lookup(&caps[2], variables) {
                Some(value) => display_value(&value),
                None => {
                    tracing::debug!(reference = &caps[2], "Unresolved template reference");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn lookup(path: &str, variables: &BTreeMap<String, String>) -> Option<Value> {
    let mut parts = path.split('.');
    let raw = variables.get(parts.next()?)?;
    let mut current = safe_parse_json(raw, Value::String(raw.clone()));
    for part in parts {
        current = match current {
            Value::Object(mut map) => map.remove(part)?,
            Value::Array(mut items) => {
                let idx: usize = part.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(current)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
