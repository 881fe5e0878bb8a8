//! listing-store - incremental, deduplicating CSV store for scraped listings
//!
//! This library provides:
//! - Records keyed by a declared identity key (single field or composite)
//! - A pure merge of a scraped batch into the stored set, tagging rows `new` / `existing`
//! - CSV load and atomic save of the store file
//! - Batch readers for JSON, JSON Lines and CSV producers
//! - Price summaries over stored records

pub mod batch;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod merge;
pub mod record;
pub mod record_set;
pub mod stats;
pub mod store;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::error::{StoreError, StoreResult};
pub use crate::key::{IdentityKey, KeyValue};
pub use crate::merge::{merge, MergeReport};
pub use crate::record::{Record, Value};
pub use crate::record_set::{Entry, RecordSet, Status};
pub use crate::store::{load, save, RecordStore};
