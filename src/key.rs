//! Identity keys: the declared field(s) that identify a record across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::record::Record;

/// One field name or an ordered tuple of field names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IdentityKey {
    fields: Vec<String>,
}

/// The persisted values of a record's key fields, in key order.
/// Compared exactly: no trimming, case-folding or URL normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyValue(Vec<String>);

impl IdentityKey {
    pub fn new<I, S>(fields: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();

        if fields.is_empty() {
            return Err(StoreError::invalid_key("at least one key field is required"));
        }
        if fields.iter().any(|f| f.is_empty()) {
            return Err(StoreError::invalid_key("key field names must not be empty"));
        }
        for (i, f) in fields.iter().enumerate() {
            if fields[..i].contains(f) {
                return Err(StoreError::invalid_key(format!("field '{}' is listed twice", f)));
            }
        }

        Ok(Self { fields })
    }

    /// Single-field key
    pub fn field(name: impl Into<String>) -> StoreResult<Self> {
        Self::new([name.into()])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Key value of `record`, or the first key field that is absent, null or empty
    pub fn value_of<'a>(&'a self, record: &Record) -> Result<KeyValue, &'a str> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match record.get(field) {
                Some(value) if !value.is_null() => parts.push(value.persisted().into_owned()),
                _ => return Err(field.as_str()),
            }
        }
        Ok(KeyValue(parts))
    }
}

impl KeyValue {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join(","))
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" | "))
    }
}

/// Parses `link` or `title,year,price`
impl FromStr for IdentityKey {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        Self::new(s.split(',').map(str::trim))
    }
}

impl TryFrom<Vec<String>> for IdentityKey {
    type Error = StoreError;

    fn try_from(fields: Vec<String>) -> StoreResult<Self> {
        Self::new(fields)
    }
}

impl From<IdentityKey> for Vec<String> {
    fn from(key: IdentityKey) -> Self {
        key.fields
    }
}
