//! Filters and partial-update operators.
//!
//! Updates name only the fields they change (`$set`, `$unset`, `$rename`), so
//! a writer never has to load and save a whole document to touch one field.

use crate::document::ID_FIELD;
use crate::{Error, Result};
use serde_json::{json, Map, Value};
use std::fmt;

/// Equality filter over top-level fields. An empty filter matches every
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.push((field.into(), value));
        self
    }

    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| fields.get(field) == Some(expected))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map: Map<String, Value> = self.conditions.iter().cloned().collect();
        write!(f, "{}", Value::Object(map))
    }
}

/// A single update operator
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set { field: String, value: Value },
    Unset { field: String },
    Rename { from: String, to: String },
}

impl UpdateOp {
    fn field_names(&self) -> Vec<&str> {
        match self {
            UpdateOp::Set { field, .. } | UpdateOp::Unset { field } => vec![field.as_str()],
            UpdateOp::Rename { from, to } => vec![from.as_str(), to.as_str()],
        }
    }

    /// Apply to a document's fields, returning whether anything changed.
    fn apply(&self, fields: &mut Map<String, Value>) -> bool {
        match self {
            UpdateOp::Set { field, value } => {
                if fields.get(field) == Some(value) {
                    return false;
                }
                fields.insert(field.clone(), value.clone());
                true
            }
            UpdateOp::Unset { field } => fields.remove(field).is_some(),
            UpdateOp::Rename { from, to } => match fields.remove(from) {
                Some(value) => {
                    fields.insert(to.clone(), value);
                    true
                }
                None => false,
            },
        }
    }
}

/// Ordered list of operators applied to each matched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.ops.push(UpdateOp::Set {
            field: field.into(),
            value,
        });
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset {
            field: field.into(),
        });
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Reject updates a store must never execute: empty updates, writes to
    /// the primary key and self-renames.
    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(Error::InvalidUpdate("update has no operators".to_string()));
        }
        for op in &self.ops {
            if op.field_names().iter().any(|f| f.is_empty()) {
                return Err(Error::InvalidUpdate("empty field name".to_string()));
            }
            if op.field_names().contains(&ID_FIELD) {
                return Err(Error::InvalidUpdate(format!(
                    "`{}` is immutable",
                    ID_FIELD
                )));
            }
            if let UpdateOp::Rename { from, to } = op {
                if from == to {
                    return Err(Error::InvalidUpdate(format!(
                        "cannot rename `{}` onto itself",
                        from
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply every operator in order. Returns whether the document changed.
    pub fn apply(&self, fields: &mut Map<String, Value>) -> bool {
        let mut modified = false;
        for op in &self.ops {
            modified |= op.apply(fields);
        }
        modified
    }

    /// Render in the familiar `{"$set": {...}}` operator form
    pub fn to_json(&self) -> Value {
        let mut set = Map::new();
        let mut unset = Map::new();
        let mut rename = Map::new();
        for op in &self.ops {
            match op {
                UpdateOp::Set { field, value } => {
                    set.insert(field.clone(), value.clone());
                }
                UpdateOp::Unset { field } => {
                    unset.insert(field.clone(), json!(""));
                }
                UpdateOp::Rename { from, to } => {
                    rename.insert(from.clone(), Value::String(to.clone()));
                }
            }
        }

        let mut out = Map::new();
        for (name, ops) in [("$set", set), ("$unset", unset), ("$rename", rename)] {
            if !ops.is_empty() {
                out.insert(name.to_string(), Value::Object(ops));
            }
        }
        Value::Object(out)
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Outcome of an update call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents the filter selected
    pub matched: u64,
    /// Documents that actually changed
    pub modified: u64,
}

impl UpdateResult {
    pub fn merge(&mut self, other: UpdateResult) {
        self.matched += other.matched;
        self.modified += other.modified;
    }
}
