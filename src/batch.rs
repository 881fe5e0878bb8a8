//! Record producers: anything that yields a finite, ordered batch of scraped records.

use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::record::{Record, Value};

/// Produces one batch of records per scrape run
pub trait RecordSource {
    fn name(&self) -> &str;

    /// Materialize the whole batch, in the order the producer scraped it
    fn produce(&mut self) -> StoreResult<Vec<Record>>;
}

/// Supported batch file layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    /// A JSON array of flat objects
    Json,
    /// One flat JSON object per line
    JsonLines,
    /// Header-led CSV; empty cells are null
    Csv,
}

impl BatchFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(BatchFormat::Json),
            "jsonl" | "ndjson" => Some(BatchFormat::JsonLines),
            "csv" => Some(BatchFormat::Csv),
            _ => None,
        }
    }
}

impl std::str::FromStr for BatchFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(BatchFormat::Json),
            "jsonl" | "ndjson" => Ok(BatchFormat::JsonLines),
            "csv" => Ok(BatchFormat::Csv),
            _ => Err(format!("unknown batch format '{}' (expected json, jsonl or csv)", s)),
        }
    }
}

/// A batch written to disk by a scraper
#[derive(Debug, Clone)]
pub struct FileBatch {
    path: PathBuf,
    format: BatchFormat,
    name: String,
}

impl FileBatch {
    /// Open a batch file, detecting its format from the extension
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let format = BatchFormat::from_path(&path).ok_or_else(|| {
            StoreError::invalid_batch(&path, "unknown extension (expected .json, .jsonl, .ndjson or .csv)")
        })?;
        Ok(Self::with_format(path, format))
    }

    pub fn with_format(path: impl Into<PathBuf>, format: BatchFormat) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string());
        Self { path, format, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> BatchFormat {
        self.format
    }
}

impl RecordSource for FileBatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self) -> StoreResult<Vec<Record>> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::invalid_batch(&self.path, e.to_string()))?;

        let records = match self.format {
            BatchFormat::Json => parse_json(&self.path, &text)?,
            BatchFormat::JsonLines => parse_json_lines(&self.path, &text)?,
            BatchFormat::Csv => parse_csv(&self.path, &text)?,
        };

        debug!("Read {} records from batch {}", records.len(), self.path.display());
        Ok(records)
    }
}

fn parse_json(path: &Path, text: &str) -> StoreResult<Vec<Record>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| StoreError::invalid_batch(path, e.to_string()))?;

    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                Record::from_json(item)
                    .map_err(|e| StoreError::invalid_batch(path, format!("record {}: {}", i, e)))
            })
            .collect(),
        _ => Err(StoreError::invalid_batch(path, "expected a JSON array of records")),
    }
}

fn parse_json_lines(path: &Path, text: &str) -> StoreResult<Vec<Record>> {
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| StoreError::invalid_batch(path, format!("line {}: {}", i + 1, e)))?;
        let record = Record::from_json(value)
            .map_err(|e| StoreError::invalid_batch(path, format!("line {}: {}", i + 1, e)))?;
        records.push(record);
    }
    Ok(records)
}

fn parse_csv(path: &Path, text: &str) -> StoreResult<Vec<Record>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| StoreError::invalid_batch(path, e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| StoreError::invalid_batch(path, e.to_string()))?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| (name, Value::from_cell(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}
