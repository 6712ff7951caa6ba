//! Document model shared by every store backend.
//!
//! A document is a JSON object keyed by its `_id` field. Identifiers are
//! strings; collection order is the lexicographic order of those strings,
//! which is also the order paginated cursors walk.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// Primary key of a stored document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as it appears inside a document or a filter
    pub fn to_value(&self) -> Value {
        Value::String(self.0.clone())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A stored record
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    fields: Map<String, Value>,
}

impl Document {
    /// Build a document from a JSON value, which must be an object with a
    /// string `_id`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Self::from_fields(fields),
            other => Err(Error::InvalidDocument(format!(
                "expected an object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        let id = match fields.get(ID_FIELD) {
            Some(Value::String(id)) => DocumentId::new(id.clone()),
            Some(other) => {
                return Err(Error::InvalidDocument(format!(
                    "`_id` must be a string, found {}",
                    json_type_name(other)
                )))
            }
            None => return Err(Error::InvalidDocument("missing `_id`".to_string())),
        };
        Ok(Self { id, fields })
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
