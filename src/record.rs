//! Scraped records: flat, ordered field-to-value mappings.

use std::borrow::Cow;
use std::fmt;

/// A single field value: text, number or null
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(serde_json::Number),
    Text(String),
}

impl Value {
    /// The cell text this value is written as in the store file.
    /// Null persists as the empty cell.
    pub fn persisted(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Number(n) => Cow::Owned(n.to_string()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
        }
    }

    /// Null and the empty string are indistinguishable once persisted
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Number(_) => false,
        }
    }

    /// Read a cell from the store file
    pub fn from_cell(cell: &str) -> Self {
        if cell.is_empty() {
            Value::Null
        } else {
            Value::Text(cell.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.persisted())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Number(n) => Ok(Value::Number(n)),
            serde_json::Value::String(s) => Ok(Value::Text(s)),
            serde_json::Value::Bool(_) => Err("boolean values are not supported".to_string()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Err("nested values are not supported".to_string())
            }
        }
    }
}

/// One scraped item. Field order is insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a field, keeping its position if it already exists
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style variant of [`Record::set`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Keep only the fields for which `keep` returns true
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &Value) -> bool,
    {
        self.fields.retain(|(n, v)| keep(n, v));
    }

    /// Persisted text of a field; absent fields read as the empty cell
    pub fn persisted(&self, name: &str) -> Cow<'_, str> {
        self.get(name).map(Value::persisted).unwrap_or(Cow::Borrowed(""))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compare two records the way they would be written to disk.
    /// Absent, null and empty fields are all equal.
    pub fn same_content(&self, other: &Record) -> bool {
        self.field_names()
            .chain(other.field_names())
            .all(|name| self.persisted(name) == other.persisted(name))
    }

    /// Build a record from a flat JSON object
    pub fn from_json(value: serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (name, v) in map {
                    let value = Value::try_from(v).map_err(|e| format!("field '{}': {}", name, e))?;
                    record.set(name, value);
                }
                Ok(record)
            }
            other => Err(format!("expected an object, found {}", json_kind(&other))),
        }
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

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
