//! Record and value types exchanged with stores.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the record identifier field.
pub const ID_FIELD: &str = "Id";

/// Field a store sets on records it failed to write.
pub const ERRORS_FIELD: &str = "Errors";

/// A single field value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Whether the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value is null or an empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Borrow the value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Textual form used for keys and files. Null renders as empty.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A flat record keyed by field name, in insertion order.
///
/// A field that is absent differs from a field that is present and null:
/// writes leave absent fields untouched and clear null ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record holding only an identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.set(ID_FIELD, id.into());
        record
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field as non-blank text.
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .filter(|v| !v.is_blank())
            .map(Value::to_text)
    }

    /// Set a field value, keeping its position if it already exists.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field, preserving the order of the others.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    /// Check whether a field is present (null counts as present).
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// The record identifier, if set and non-empty.
    pub fn id(&self) -> Option<&str> {
        self.fields
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The error message a store attached to this record, if any.
    pub fn error(&self) -> Option<String> {
        self.text(ERRORS_FIELD)
    }

    /// Field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate over fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overwrite fields from another record, field by field.
    pub fn merge_from(&mut self, other: &Record) {
        for (field, value) in other.iter() {
            self.set(field, value.clone());
        }
    }

    /// Copy of this record restricted to the given fields, skipping absent ones.
    pub fn project<'a>(&self, fields: impl IntoIterator<Item = &'a str>) -> Record {
        let mut out = Record::new();
        for field in fields {
            if let Some(value) = self.fields.get(field) {
                out.set(field, value.clone());
            }
        }
        out
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// Append records whose identifier is not already present.
///
/// Records without an identifier are always appended.
pub fn merge_by_id(existing: &mut Vec<Record>, incoming: Vec<Record>) -> usize {
    let mut seen: std::collections::HashSet<String> = existing
        .iter()
        .filter_map(|r| r.id().map(str::to_string))
        .collect();
    let mut added = 0;
    for record in incoming {
        if let Some(id) = record.id() {
            if !seen.insert(id.to_string()) {
                continue;
            }
        }
        existing.push(record);
        added += 1;
    }
    added
}
