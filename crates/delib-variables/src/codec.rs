//! Value codec: canonical serialised form, defensive parsing, and
//! schema-guided edits of stored values.
//!
//! The canonical form of a value is its compact JSON text. Parsing never
//! fails: malformed or mismatching input yields the caller's fallback.

use serde_json::{Map, Number, Value};

use delib_types::{DelibError, Result};

use crate::schema::{is_index, split_path, Schema};

/// Serialise `value` to its canonical string form.
///
/// `null` is replaced by the schema's default so that stored values always
/// have a concrete shape.
pub fn serialize(schema: &Schema, value: &Value) -> String {
    if value.is_null() {
        return schema.default_value().to_string();
    }
    value.to_string()
}

/// Parse a stored value, returning `fallback` when the text is malformed or
/// does not conform to `schema`.
///
/// String schemas also accept bare, unquoted text (`blue` as well as
/// `"blue"`), which is how hand-written configs usually store them.
pub fn deserialize(schema: &Schema, text: &str, fallback: Value) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) if conforms(schema, &parsed) => parsed,
        _ if matches!(schema, Schema::String) => Value::String(text.to_string()),
        Ok(_) => {
            tracing::warn!(
                text,
                schema = ?schema.kind(),
                "stored value does not match schema, using fallback"
            );
            fallback
        }
        Err(err) => {
            tracing::warn!(text, error = %err, "malformed stored value, using fallback");
            fallback
        }
    }
}

/// Parse JSON, falling back on empty or malformed input.
pub fn safe_parse_json(text: &str, fallback: Value) -> Value {
    if text.is_empty() {
        return fallback;
    }
    serde_json::from_str(text).unwrap_or(fallback)
}

/// Whether `value` has the shape `schema` describes. Object properties
/// declared by the schema are required; undeclared extras are allowed.
pub fn conforms(schema: &Schema, value: &Value) -> bool {
    validation_errors(schema, value, "").is_empty()
}

/// Validate `value` against `schema`, returning every mismatch as a
/// `path: message` string.
pub fn validate_value(schema: &Schema, value: &Value) -> std::result::Result<(), Vec<String>> {
    let errors = validation_errors(schema, value, "");
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validation_errors(schema: &Schema, value: &Value, path: &str) -> Vec<String> {
    let here = if path.is_empty() { "/" } else { path };
    match (schema, value) {
        (Schema::String, Value::String(_))
        | (Schema::Number, Value::Number(_))
        | (Schema::Boolean, Value::Bool(_)) => Vec::new(),
        (Schema::Object { properties }, Value::Object(map)) => properties
            .iter()
            .flat_map(|(name, prop)| {
                let child = format!("{path}/{name}");
                match map.get(name) {
                    Some(v) => validation_errors(prop, v, &child),
                    None => vec![format!("{here}: missing required property '{name}'")],
                }
            })
            .collect(),
        (Schema::Array { items }, Value::Array(values)) => values
            .iter()
            .enumerate()
            .flat_map(|(i, v)| validation_errors(items, v, &format!("{path}/{i}")))
            .collect(),
        (schema, _) => vec![format!("{here}: expected {}", schema.kind())],
    }
}

// ---------------------------------------------------------------------------
// Input form: editor field text
// ---------------------------------------------------------------------------

/// Render a value for a single-line editor field.
pub fn format_input(schema: &Schema, value: &Value) -> String {
    match (schema, value) {
        (Schema::String, Value::String(s)) => s.clone(),
        (Schema::String, Value::Null) => String::new(),
        (Schema::Number, Value::Null) => "0".to_string(),
        (Schema::Boolean, Value::Null) => "false".to_string(),
        (Schema::Object { .. } | Schema::Array { .. }, Value::Null) => String::new(),
        (_, v) => v.to_string(),
    }
}

/// Parse editor text according to the schema type.
pub fn parse_input(schema: &Schema, text: &str) -> Result<Value> {
    match schema {
        Schema::String => Ok(Value::String(text.to_string())),
        Schema::Number if text.trim().is_empty() => Ok(Value::from(0)),
        Schema::Number => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(number_value)
            .ok_or_else(|| DelibError::Schema(format!("'{text}' is not a number"))),
        Schema::Boolean => Ok(Value::Bool(text == "true")),
        Schema::Object { .. } | Schema::Array { .. } if text.is_empty() => {
            Ok(schema.default_value())
        }
        Schema::Object { .. } | Schema::Array { .. } => Ok(serde_json::from_str(text)?),
    }
}

/// JSON number for `n`, preferring an integer representation.
pub fn number_value(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

// ---------------------------------------------------------------------------
// Path edits
// ---------------------------------------------------------------------------

/// Set the value at a dot-separated `path`, guided by `schema`.
///
/// Segments name object properties; a numeric segment addresses one array
/// element, while a property segment applied to an array updates every
/// element. If a segment does not resolve in the schema, or the value has no
/// matching container there, `root` is returned unchanged.
pub fn set_value_at_path(root: &Value, schema: &Schema, path: &str, new_value: Value) -> Value {
    let parts = split_path(path);
    set_at(root, schema, &parts, &new_value)
}

fn set_at(value: &Value, schema: &Schema, parts: &[&str], new_value: &Value) -> Value {
    let Some((first, rest)) = parts.split_first() else {
        return new_value.clone();
    };

    match (schema, value) {
        (Schema::Object { properties }, Value::Object(map)) => {
            let Some(prop) = properties.get(first) else {
                return value.clone();
            };
            let updated = match map.get(*first) {
                _ if rest.is_empty() => new_value.clone(),
                Some(child) => set_at(child, prop, rest, new_value),
                None => return value.clone(),
            };
            let mut map = map.clone();
            map.insert(first.to_string(), updated);
            Value::Object(map)
        }
        (Schema::Array { items }, Value::Array(values)) if is_index(first) => {
            let idx: usize = first.parse().unwrap_or(usize::MAX);
            if idx >= values.len() {
                return value.clone();
            }
            let mut values = values.clone();
            values[idx] = set_at(&values[idx], items, rest, new_value);
            Value::Array(values)
        }
        (Schema::Array { items }, Value::Array(values)) => Value::Array(
            values
                .iter()
                .map(|item| set_at(item, items, parts, new_value))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Rename the property addressed by `old_path` to `new_name`, keeping its
/// position and every sibling.
///
/// Arrays along the parent path are mapped over. If the new name is already
/// taken at that level the object is left as-is.
pub fn rename_property_in_value(value: &Value, old_path: &str, new_name: &str) -> Value {
    let parts = split_path(old_path);
    let Some((old_name, parent)) = parts.split_last() else {
        return value.clone();
    };
    rename_at(value, parent, old_name, new_name)
}

fn rename_at(value: &Value, parent: &[&str], old_name: &str, new_name: &str) -> Value {
    match (parent.split_first(), value) {
        (None, Value::Object(map)) => {
            if !map.contains_key(old_name) || (old_name != new_name && map.contains_key(new_name)) {
                return value.clone();
            }
            let renamed: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let key = if k == old_name { new_name } else { k.as_str() };
                    (key.to_string(), v.clone())
                })
                .collect();
            Value::Object(renamed)
        }
        (Some((first, rest)), Value::Object(map)) => match map.get(*first) {
            Some(child) => {
                let mut map = map.clone();
                map.insert(first.to_string(), rename_at(child, rest, old_name, new_name));
                Value::Object(map)
            }
            None => value.clone(),
        },
        (Some((first, rest)), Value::Array(items)) if is_index(first) => {
            let idx: usize = first.parse().unwrap_or(usize::MAX);
            if idx >= items.len() {
                return value.clone();
            }
            let mut items = items.clone();
            items[idx] = rename_at(&items[idx], rest, old_name, new_name);
            Value::Array(items)
        }
        (_, Value::Array(items)) => Value::Array(
            items
                .iter()
                .map(|item| rename_at(item, parent, old_name, new_name))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Bring a stored value in line with a schema edit at `path`.
///
/// If the node at `path` changed kind (or disappeared and was recreated), the
/// value there is replaced by the new node's default; unchanged kinds keep
/// their data.
pub fn reset_value_for_schema_change(
    value: &Value,
    old: &Schema,
    new: &Schema,
    path: &str,
) -> Value {
    let Some(new_node) = new.at_path(path).or_else(|| array_aware_at(new, path)) else {
        return value.clone();
    };
    let old_node = old.at_path(path).or_else(|| array_aware_at(old, path));
    if old_node.map(Schema::kind) == Some(new_node.kind()) {
        return value.clone();
    }
    tracing::debug!(path, kind = %new_node.kind(), "schema kind changed, regenerating default");
    if split_path(path).is_empty() {
        return new_node.default_value();
    }
    set_value_at_path(value, new, path, new_node.default_value())
}

/// Resolve a path whose property segments pass through arrays without an
/// explicit index (`people.name` on `{people: [{name}]}`).
fn array_aware_at<'a>(schema: &'a Schema, path: &str) -> Option<&'a Schema> {
    let mut current = schema;
    for part in split_path(path) {
        while let Schema::Array { items } = current {
            if is_index(part) {
                break;
            }
            current = items;
        }
        current = match current {
            Schema::Array { items } => items,
            Schema::Object { properties } => properties.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}
