//! Named schemas: per-field type constraints for JSON chunks.

use std::collections::BTreeMap;

use serde_json::Value;

/// How a chunk governed by a schema is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// A JSON object, validated field by field.
    Json,
    /// Opaque bytes, passed through unvalidated.
    Binary,
}

/// The JSON type a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeConstraint {
    Object,
    Array,
    String,
    Int,
    Bool,
    Double,
    Number,
    Any,
}

impl TypeConstraint {
    fn accepts(self, value: &Value) -> bool {
        match self {
            TypeConstraint::Object => value.is_object(),
            TypeConstraint::Array => value.is_array(),
            TypeConstraint::String => value.is_string(),
            TypeConstraint::Int => value.is_i64() || value.is_u64(),
            TypeConstraint::Bool => value.is_boolean(),
            TypeConstraint::Double => value.is_f64(),
            TypeConstraint::Number => value.is_number(),
            TypeConstraint::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            TypeConstraint::Object => "object",
            TypeConstraint::Array => "array",
            TypeConstraint::String => "string",
            TypeConstraint::Int => "integer",
            TypeConstraint::Bool => "boolean",
            TypeConstraint::Double => "double",
            TypeConstraint::Number => "number",
            TypeConstraint::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldConstraint {
    kind: TypeConstraint,
    required: bool,
}

/// A named set of field constraints.  Fields without a constraint are allowed
/// and unchecked.
///
/// ```rust
/// use cthun_protocol::{ContentType, Schema, TypeConstraint};
///
/// let mut schema = Schema::new("example/v1", ContentType::Json);
/// schema
///     .add_constraint("id", TypeConstraint::String, true)
///     .add_constraint("retries", TypeConstraint::Int, false);
///
/// assert!(schema.check(&serde_json::json!({"id": "a"})).is_ok());
/// assert!(schema.check(&serde_json::json!({"retries": 1})).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    content_type: ContentType,
    fields: BTreeMap<String, FieldConstraint>,
}

impl Schema {
    pub fn new(name: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            name: name.into(),
            content_type,
            fields: BTreeMap::new(),
        }
    }

    /// Constrain `field` to `kind`.  A later call for the same field replaces
    /// the earlier constraint.
    ///
    /// Returns `&mut Self` for method chaining.
    pub fn add_constraint(
        &mut self,
        field: impl Into<String>,
        kind: TypeConstraint,
        required: bool,
    ) -> &mut Self {
        self.fields
            .insert(field.into(), FieldConstraint { kind, required });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    /// Check a JSON document against this schema.  On failure, returns every
    /// violated constraint, one line each.
    pub fn check(&self, doc: &Value) -> Result<(), String> {
        let Some(obj) = doc.as_object() else {
            return Err("document is not a JSON object".into());
        };

        let mut problems = Vec::new();
        for (field, constraint) in &self.fields {
            match obj.get(field) {
                None if constraint.required => {
                    problems.push(format!("missing required field '{field}'"));
                }
                None => {}
                Some(value) if !constraint.kind.accepts(value) => {
                    problems.push(format!(
                        "field '{field}' must be of type {}",
                        constraint.kind.as_str()
                    ));
                }
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}
