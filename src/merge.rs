//! Merging a freshly scraped batch into a loaded record set.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::key::KeyValue;
use crate::record::Record;
use crate::record_set::{RecordSet, Status};

/// Counts produced by [`merge`]. Every count is over distinct key values
/// except `superseded`, which counts batch records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Keys absent from the existing set
    pub new: usize,
    /// Existing keys whose stored content changed
    pub updated: usize,
    /// Existing keys present in the batch with identical content
    pub unchanged: usize,
    /// Existing keys the batch did not mention
    pub retained: usize,
    /// Batch records overridden by a later record with the same key
    pub superseded: usize,
}

impl MergeReport {
    /// Whether the merge changed anything that would be persisted
    pub fn has_changes(&self) -> bool {
        self.new > 0 || self.updated > 0
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} unchanged, {} retained",
            self.new, self.updated, self.unchanged, self.retained
        )?;
        if self.superseded > 0 {
            write!(f, " ({} superseded within batch)", self.superseded)?;
        }
        Ok(())
    }
}

/// Merge `incoming` into `existing` and return the merged set.
///
/// New keys are added with status `new`. Keys already present have their
/// record replaced by the incoming one and get status `existing`. Within the
/// batch, later records win over earlier ones with the same key. Records the
/// batch does not mention are kept as they are, status included.
///
/// Every key is checked before anything is merged: a record without a usable
/// key fails the whole batch with [`StoreError::MissingKey`].
pub fn merge<I>(existing: &RecordSet, incoming: I) -> StoreResult<(RecordSet, MergeReport)>
where
    I: IntoIterator<Item = Record>,
{
    existing.check_key()?;
    let key = existing.key();

    let mut keyed: Vec<(KeyValue, Record)> = Vec::new();
    for (index, mut record) in incoming.into_iter().enumerate() {
        let value = key
            .value_of(&record)
            .map_err(|field| StoreError::MissingKey { index, field: field.to_string() })?;
        // status is derived, never scraped data
        record.retain(|name, _| !existing.is_status_column(name));
        keyed.push((value, record));
    }

    // Collapse the batch so each key carries its last record
    let mut last: HashMap<&KeyValue, usize> = HashMap::with_capacity(keyed.len());
    for (i, (value, _)) in keyed.iter().enumerate() {
        last.insert(value, i);
    }
    let superseded = keyed.len() - last.len();
    let winners: Vec<bool> = (0..keyed.len()).map(|i| last.get(&keyed[i].0) == Some(&i)).collect();
    drop(last);

    let mut merged = existing.clone();
    let mut report = MergeReport { superseded, ..MergeReport::default() };

    for ((value, record), winner) in keyed.into_iter().zip(winners) {
        if !winner {
            continue;
        }
        match existing.get(&value) {
            Some(previous) => {
                if previous.record.same_content(&record) {
                    report.unchanged += 1;
                } else {
                    report.updated += 1;
                }
                merged.upsert(value, record, Some(Status::Existing));
            }
            None => {
                report.new += 1;
                merged.upsert(value, record, Some(Status::New));
            }
        }
    }

    report.retained = existing.len() - report.updated - report.unchanged;

    Ok((merged, report))
}
