//! Schema model: a small recursive description of a variable's value shape.
//!
//! Schemas serialise as JSON-Schema-like objects:
//! ```text
//! {"type": "string"}
//! {"type": "object", "properties": {"name": {"type": "string"}}}
//! {"type": "array", "items": {"type": "number"}}
//! ```
//!
//! Every edit is pure: it returns a new [`Schema`] and leaves the receiver
//! untouched, so callers can compare old and new trees to decide whether a
//! stored value needs its default regenerated (see
//! [`reset_value_for_schema_change`](crate::codec::reset_value_for_schema_change)).

use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use delib_types::DelibError;

/// A node in a schema tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schema {
    String,
    Number,
    Boolean,
    Object {
        #[serde(default)]
        properties: Properties,
    },
    Array {
        items: Box<Schema>,
    },
}

/// The kind of a schema node, without its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaKind::String => "string",
            SchemaKind::Number => "number",
            SchemaKind::Boolean => "boolean",
            SchemaKind::Object => "object",
            SchemaKind::Array => "array",
        };
        f.write_str(s)
    }
}

impl FromStr for SchemaKind {
    type Err = DelibError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(SchemaKind::String),
            "number" => Ok(SchemaKind::Number),
            "boolean" => Ok(SchemaKind::Boolean),
            "object" => Ok(SchemaKind::Object),
            "array" => Ok(SchemaKind::Array),
            other => Err(DelibError::Schema(format!("unknown schema type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Properties: ordered, uniquely named object members
// ---------------------------------------------------------------------------

/// Ordered property list of an object schema. Names are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(Vec<(String, Schema)>);

impl Properties {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Schema)> {
        self.0.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Insert or replace `name`, keeping the position of an existing entry.
    fn upsert(&mut self, name: &str, schema: Schema) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = schema,
            None => self.0.push((name.to_string(), schema)),
        }
    }
}

impl FromIterator<(String, Schema)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Schema)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (name, schema) in iter {
            props.upsert(&name, schema);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, schema) in &self.0 {
            map.serialize_entry(name, schema)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = Properties;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of property names to schemas")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Properties, A::Error> {
                let mut props = Properties::new();
                while let Some((name, schema)) = access.next_entry::<String, Schema>()? {
                    props.upsert(&name, schema);
                }
                Ok(props)
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

// ---------------------------------------------------------------------------
// Schema operations
// ---------------------------------------------------------------------------

impl Schema {
    /// Minimal schema of the requested kind. Arrays default to string items.
    pub fn for_kind(kind: SchemaKind) -> Schema {
        match kind {
            SchemaKind::String => Schema::String,
            SchemaKind::Number => Schema::Number,
            SchemaKind::Boolean => Schema::Boolean,
            SchemaKind::Object => Schema::Object {
                properties: Properties::new(),
            },
            SchemaKind::Array => Schema::array(Schema::String),
        }
    }

    pub fn array(items: Schema) -> Schema {
        Schema::Array {
            items: Box::new(items),
        }
    }

    pub fn object<I, N>(properties: I) -> Schema
    where
        I: IntoIterator<Item = (N, Schema)>,
        N: Into<String>,
    {
        Schema::Object {
            properties: properties.into_iter().map(|(n, s)| (n.into(), s)).collect(),
        }
    }

    pub fn kind(&self) -> SchemaKind {
        match self {
            Schema::String => SchemaKind::String,
            Schema::Number => SchemaKind::Number,
            Schema::Boolean => SchemaKind::Boolean,
            Schema::Object { .. } => SchemaKind::Object,
            Schema::Array { .. } => SchemaKind::Array,
        }
    }

    pub fn properties(&self) -> Option<&Properties> {
        match self {
            Schema::Object { properties } => Some(properties),
            _ => None,
        }
    }

    /// The item schema of an array, or the schema itself for anything else.
    ///
    /// Pooled configs store their definition as `Array(Item)` while each
    /// pooled value is a single item.
    pub fn item_schema(&self) -> &Schema {
        match self {
            Schema::Array { items } => items,
            other => other,
        }
    }

    /// Immediate default: `""`, `0`, `false`, `{}` or `[]`.
    ///
    /// Nested property defaults are not synthesised here; they are filled
    /// lazily on first edit.
    pub fn default_value(&self) -> Value {
        match self {
            Schema::String => Value::String(String::new()),
            Schema::Number => Value::from(0),
            Schema::Boolean => Value::Bool(false),
            Schema::Object { .. } => Value::Object(serde_json::Map::new()),
            Schema::Array { .. } => Value::Array(Vec::new()),
        }
    }

    /// Add a string-typed property. Returns `None` if `name` already exists
    /// or this is not an object schema.
    pub fn add_property(&self, name: &str) -> Option<Schema> {
        let props = self.properties()?;
        if props.contains(name) {
            return None;
        }
        let mut props = props.clone();
        props.upsert(name, Schema::String);
        Some(Schema::Object { properties: props })
    }

    /// Rename a property in place. Returns `None` if `old` is missing, `new`
    /// is already taken, or this is not an object schema.
    pub fn rename_property(&self, old: &str, new: &str) -> Option<Schema> {
        let props = self.properties()?;
        if !props.contains(old) || (old != new && props.contains(new)) {
            return None;
        }
        let renamed = props
            .0
            .iter()
            .map(|(n, s)| {
                let name = if n == old { new.to_string() } else { n.clone() };
                (name, s.clone())
            })
            .collect();
        Some(Schema::Object {
            properties: Properties(renamed),
        })
    }

    /// Remove a property. Non-object schemas and unknown names are returned as-is.
    pub fn remove_property(&self, name: &str) -> Schema {
        match self.properties() {
            Some(props) => Schema::Object {
                properties: Properties(
                    props.0.iter().filter(|(n, _)| n != name).cloned().collect(),
                ),
            },
            None => self.clone(),
        }
    }

    /// Insert or replace a property's schema.
    pub fn update_property(&self, name: &str, schema: Schema) -> Schema {
        match self.properties() {
            Some(props) => {
                let mut props = props.clone();
                props.upsert(name, schema);
                Schema::Object { properties: props }
            }
            None => self.clone(),
        }
    }

    /// Navigate a dot-separated path through object properties and numeric
    /// array indices.
    pub fn at_path(&self, path: &str) -> Option<&Schema> {
        let mut current = self;
        for part in split_path(path) {
            current = match current {
                Schema::Array { items } if is_index(part) => items,
                Schema::Object { properties } => properties.get(part)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace the node at `path` with `replacement`.
    ///
    /// Array-typed properties are transparent: deeper segments continue into
    /// the item schema, and a non-array replacement aimed at the array
    /// property itself replaces its item schema. Unresolvable paths leave the
    /// schema unchanged.
    pub fn update_at_path(&self, path: &str, replacement: Schema) -> Schema {
        let parts = split_path(path);
        update_at(self, &parts, replacement)
    }
}

fn update_at(schema: &Schema, parts: &[&str], replacement: Schema) -> Schema {
    let Some((first, rest)) = parts.split_first() else {
        return replacement;
    };
    let Some(prop) = schema.properties().and_then(|p| p.get(first)) else {
        return schema.clone();
    };

    let updated = match prop {
        Schema::Array { items } if !rest.is_empty() => {
            Schema::array(update_at(items, rest, replacement))
        }
        Schema::Array { .. } if replacement.kind() != SchemaKind::Array => {
            Schema::array(replacement)
        }
        _ => update_at(prop, rest, replacement),
    };
    schema.update_property(first, updated)
}

/// Split a dot path, ignoring empty segments.
pub(crate) fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|p| !p.is_empty()).collect()
}

pub(crate) fn is_index(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Schema {
        Schema::object([("name", Schema::String), ("age", Schema::Number)])
    }

    #[test]
    fn for_kind_creates_minimal_schemas() {
        assert_eq!(Schema::for_kind(SchemaKind::String), Schema::String);
        assert_eq!(
            Schema::for_kind(SchemaKind::Object),
            Schema::Object {
                properties: Properties::new()
            }
        );
        assert_eq!(
            Schema::for_kind(SchemaKind::Array),
            Schema::array(Schema::String)
        );
    }

    #[test]
    fn default_values_are_shallow() {
        assert_eq!(Schema::String.default_value(), json!(""));
        assert_eq!(Schema::Number.default_value(), json!(0));
        assert_eq!(Schema::Boolean.default_value(), json!(false));
        assert_eq!(person().default_value(), json!({}));
        assert_eq!(Schema::array(person()).default_value(), json!([]));
    }

    #[test]
    fn add_property_rejects_duplicates() {
        let schema = person();
        assert!(schema.add_property("name").is_none());

        let added = schema.add_property("email").unwrap();
        let names: Vec<_> = added.properties().unwrap().names().collect();
        assert_eq!(names, vec!["name", "age", "email"]);
        assert_eq!(added.at_path("email"), Some(&Schema::String));
        // Original untouched
        assert_eq!(schema.properties().unwrap().len(), 2);
    }

    #[test]
    fn add_property_on_non_object_is_none() {
        assert!(Schema::String.add_property("x").is_none());
    }

    #[test]
    fn rename_property_keeps_position() {
        let renamed = person().rename_property("name", "full_name").unwrap();
        let names: Vec<_> = renamed.properties().unwrap().names().collect();
        assert_eq!(names, vec!["full_name", "age"]);
        assert!(person().rename_property("missing", "x").is_none());
        assert!(person().rename_property("name", "age").is_none());
    }

    #[test]
    fn remove_property_drops_only_that_entry() {
        let removed = person().remove_property("name");
        let names: Vec<_> = removed.properties().unwrap().names().collect();
        assert_eq!(names, vec!["age"]);
        assert_eq!(Schema::Number.remove_property("x"), Schema::Number);
    }

    #[test]
    fn at_path_walks_objects_and_array_indices() {
        let schema = Schema::object([("people", Schema::array(person()))]);
        assert_eq!(schema.at_path(""), Some(&schema));
        assert_eq!(schema.at_path("people.0.age"), Some(&Schema::Number));
        assert!(schema.at_path("people.name").is_none());
        assert!(schema.at_path("nope").is_none());
    }

    #[test]
    fn update_at_path_changes_nested_type() {
        let schema = Schema::object([("people", Schema::array(person()))]);
        let updated = schema.update_at_path("people.age", Schema::String);
        assert_eq!(updated.at_path("people.0.age"), Some(&Schema::String));
        // Sibling intact
        assert_eq!(updated.at_path("people.0.name"), Some(&Schema::String));
    }

    #[test]
    fn update_at_array_property_replaces_item_schema() {
        let schema = Schema::object([("tags", Schema::array(Schema::String))]);
        let updated = schema.update_at_path("tags", Schema::Number);
        assert_eq!(updated.at_path("tags"), Some(&Schema::array(Schema::Number)));

        let replaced = schema.update_at_path("tags", Schema::array(Schema::Boolean));
        assert_eq!(
            replaced.at_path("tags"),
            Some(&Schema::array(Schema::Boolean))
        );
    }

    #[test]
    fn update_at_unknown_path_is_noop() {
        let schema = person();
        assert_eq!(schema.update_at_path("missing.deep", Schema::Boolean), schema);
        assert_eq!(schema.update_at_path("", Schema::Boolean), Schema::Boolean);
    }

    #[test]
    fn serializes_json_schema_shape_in_order() {
        let schema = Schema::object([
            ("zeta", Schema::String),
            ("alpha", Schema::array(Schema::Number)),
        ]);
        let text = serde_json::to_string(&schema).unwrap();
        assert_eq!(
            text,
            concat!(
                r#"{"type":"object","properties":{"zeta":{"type":"string"},"#,
                r#""alpha":{"type":"array","items":{"type":"number"}}}}"#
            )
        );
        let back: Schema = serde_json::from_str(&text).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn deserializes_object_without_properties() {
        let schema: Schema = serde_json::from_str(r#"{"type":"object"}"#).unwrap();
        assert_eq!(schema, Schema::for_kind(SchemaKind::Object));
    }

    #[test]
    fn kind_parses_from_str() {
        assert_eq!("boolean".parse::<SchemaKind>().unwrap(), SchemaKind::Boolean);
        assert!("date".parse::<SchemaKind>().is_err());
    }
}
