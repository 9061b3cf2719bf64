//! Typed view of `jsonSchemaForInsert`
//!
//! The insert schema is validated once when it is loaded: object, array and
//! scalar shapes are resolved and unsupported composition keywords rejected.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::error::{RelSchemaError, Result};
use crate::model::{JsonPathExpression, JsonPathSegment};

const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "$ref",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "patternProperties",
    "if",
    "then",
    "else",
];

#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaNode {
    pub kind: JsonSchemaKind,
    /// `x-nullable: true` on the property schema
    pub x_nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonSchemaKind {
    Object(ObjectSchema),
    Array(Box<JsonSchemaNode>),
    Scalar(ScalarSchema),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    /// Ordered by property name (ordinal)
    pub properties: BTreeMap<String, JsonSchemaNode>,
    pub required: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalarSchema {
    /// JSON `type` keyword; empty when absent
    pub json_type: String,
    pub format: Option<String>,
    pub max_length: Option<u64>,
}

impl JsonSchemaNode {
    /// Parse and validate a schema node rooted at `schema_path` (used in error messages).
    pub fn parse(value: &Value, schema_path: &str) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "Expected JSON schema object at {}.",
                schema_path
            ))
        })?;

        validate_keywords(object, schema_path)?;

        let json_type = object.get("type").and_then(Value::as_str).unwrap_or("");
        let x_nullable = object
            .get("x-nullable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let kind = if json_type == "object" || object.contains_key("properties") {
            JsonSchemaKind::Object(parse_object(object, schema_path)?)
        } else if json_type == "array" {
            let items = object.get("items").ok_or_else(|| {
                RelSchemaError::schema_input(format!(
                    "Array schema items must be an object at {}.",
                    schema_path
                ))
            })?;
            let items_path = format!("{}.items", schema_path);
            JsonSchemaKind::Array(Box::new(JsonSchemaNode::parse(items, &items_path)?))
        } else {
            JsonSchemaKind::Scalar(ScalarSchema {
                json_type: json_type.to_string(),
                format: object
                    .get("format")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                max_length: object.get("maxLength").and_then(Value::as_u64),
            })
        };

        Ok(Self { kind, x_nullable })
    }

    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match &self.kind {
            JsonSchemaKind::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarSchema> {
        match &self.kind {
            JsonSchemaKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }

    /// Walk a path through properties and array items.
    pub fn resolve(&self, path: &JsonPathExpression) -> Option<&JsonSchemaNode> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, &current.kind) {
                (JsonPathSegment::Property(name), JsonSchemaKind::Object(object)) => {
                    object.properties.get(name)?
                }
                (JsonPathSegment::AnyArrayElement, JsonSchemaKind::Array(items)) => items,
                _ => return None,
            };
        }
        Some(current)
    }
}

fn validate_keywords(object: &Map<String, Value>, schema_path: &str) -> Result<()> {
    for keyword in UNSUPPORTED_KEYWORDS {
        if object.contains_key(*keyword) {
            return Err(RelSchemaError::schema_input(format!(
                "Unsupported JSON schema keyword '{}' at {}.",
                keyword, schema_path
            )));
        }
    }
    Ok(())
}

fn parse_object(object: &Map<String, Value>, schema_path: &str) -> Result<ObjectSchema> {
    let mut parsed = ObjectSchema::default();

    if let Some(properties) = object.get("properties") {
        let properties = properties.as_object().ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "Expected properties to be an object at {}.",
                schema_path
            ))
        })?;
        for (name, property) in properties {
            let property_path = format!("{}.properties.{}", schema_path, name);
            parsed
                .properties
                .insert(name.clone(), JsonSchemaNode::parse(property, &property_path)?);
        }
    }

    if let Some(required) = object.get("required") {
        let required = required.as_array().ok_or_else(|| {
            RelSchemaError::schema_input(format!(
                "Expected required to be an array at {}.",
                schema_path
            ))
        })?;
        for entry in required {
            let name = entry.as_str().ok_or_else(|| {
                RelSchemaError::schema_input(format!(
                    "Expected required entries to be strings at {}.",
                    schema_path
                ))
            })?;
            parsed.required.insert(name.to_string());
        }
    }

    Ok(parsed)
}
