//! The deduplicated, status-annotated collection of records for one store.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};
use crate::key::{IdentityKey, KeyValue};
use crate::record::Record;

/// Whether a record was first observed in the latest merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    New,
    Existing,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::New => write!(f, "new"),
            Status::Existing => write!(f, "existing"),
        }
    }
}

/// Case-insensitive; `updated` is what older highlight columns wrote for changed rows
impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(Status::New),
            "existing" | "updated" => Ok(Status::Existing),
            _ => Err(format!("unknown status '{}'", s)),
        }
    }
}

/// A stored record with its status tag
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub record: Record,
    pub status: Option<Status>,
}

/// Default name of the status column
pub const STATUS_COLUMN: &str = "status";

/// At most one record per key value, in insertion order
#[derive(Debug, Clone)]
pub struct RecordSet {
    key: IdentityKey,
    status_column: String,
    entries: Vec<Entry>,
    index: HashMap<KeyValue, usize>,
    columns: Vec<String>,
}

impl RecordSet {
    pub fn new(key: IdentityKey) -> Self {
        let columns = key.fields().to_vec();
        Self {
            key,
            status_column: STATUS_COLUMN.to_string(),
            entries: Vec::new(),
            index: HashMap::new(),
            columns,
        }
    }

    /// Use a different column for the status tag (older stores call it `highlight`)
    pub fn with_status_column(mut self, name: impl Into<String>) -> Self {
        self.status_column = name.into();
        self
    }

    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    pub fn status_column(&self) -> &str {
        &self.status_column
    }

    /// Whether `name` refers to the status column. Matching ignores ASCII case,
    /// since older stores spell it `Status`.
    pub fn is_status_column(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.status_column)
    }

    /// Reject an identity key that names the status column: the tag would
    /// overwrite the key cell on save and leave an unloadable store.
    pub fn check_key(&self) -> StoreResult<()> {
        if self.status_column.is_empty() {
            return Err(StoreError::invalid_key("status column name is empty"));
        }
        match self.key.fields().iter().find(|f| self.is_status_column(f)) {
            Some(field) => Err(StoreError::invalid_key(format!(
                "key field '{}' is the status column '{}'",
                field, self.status_column
            ))),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &KeyValue) -> Option<&Entry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn contains_key(&self, key: &KeyValue) -> bool {
        self.index.contains_key(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().map(|e| &e.record)
    }

    /// Key values in insertion order
    pub fn keys(&self) -> Vec<KeyValue> {
        let mut keys: Vec<(usize, &KeyValue)> = self.index.iter().map(|(k, &i)| (i, k)).collect();
        keys.sort_unstable_by_key(|(i, _)| *i);
        keys.into_iter().map(|(_, k)| k.clone()).collect()
    }

    /// Data columns: key fields first, then other fields in first-seen order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn count_status(&self, status: Option<Status>) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn has_status(&self) -> bool {
        self.entries.iter().any(|e| e.status.is_some())
    }

    /// Register a column without adding a record, so a header-only store keeps its schema
    pub(crate) fn add_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
    }

    /// Insert or replace the record stored under `key`. A replaced record keeps its position.
    /// Returns the previous entry, if any.
    pub(crate) fn upsert(&mut self, key: KeyValue, record: Record, status: Option<Status>) -> Option<Entry> {
        for name in record.field_names() {
            if !self.columns.iter().any(|c| c == name) {
                self.columns.push(name.to_string());
            }
        }

        let entry = Entry { record, status };
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i], entry)),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(entry);
                None
            }
        }
    }
}
