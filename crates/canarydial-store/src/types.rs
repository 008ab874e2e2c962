//! Request and response types for record store point lookups.
//!
//! The wire model mirrors composite-keyed key/value tables: a record is
//! addressed by a partition key plus a range key, and field values carry
//! their storage encoding (numbers travel as decimal strings).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One component of a composite record key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    /// Field name in the table schema.
    pub name: String,
    /// Key value to match.
    pub value: String,
}

impl KeyField {
    /// Create a key component.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single-key read request against a record store table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointLookup {
    /// Table to read from.
    pub table: String,
    /// Partition (hash) key component.
    pub partition: KeyField,
    /// Range (sort) key component.
    pub range: KeyField,
    /// Field names to return. Empty means all fields.
    pub projection: Vec<String>,
    /// Request the most recent write rather than an eventually consistent
    /// snapshot.
    pub consistent: bool,
}

/// A field value as serialized by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Decimal-string-encoded number.
    Number(String),
    /// UTF-8 text.
    Text(String),
    /// Boolean flag.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The decimal string, if this field is stored as a number.
    pub fn as_number(&self) -> Option<&str> {
        match self {
            Self::Number(raw) => Some(raw),
            _ => None,
        }
    }

    /// The text content, if this field is stored as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// A record returned from a point lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: HashMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Number of fields in the record.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this record restricted to the named fields.
    ///
    /// An empty projection keeps every field.
    pub fn project(&self, projection: &[String]) -> Record {
        if projection.is_empty() {
            return self.clone();
        }
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| projection.iter().any(|p| p == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Record { fields }
    }
}
