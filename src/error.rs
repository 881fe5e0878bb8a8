use std::path::PathBuf;
use thiserror::Error;

/// Error types raised by the record store
#[derive(Error, Debug)]
pub enum StoreError {
    // Store file errors
    #[error("Corrupt store {}: {reason}", .path.display())]
    CorruptStore { path: PathBuf, reason: String },

    #[error("Failed to read store {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Merge errors
    #[error("Record {index} in batch has no value for key field '{field}'")]
    MissingKey { index: usize, field: String },

    #[error("Invalid identity key: {reason}")]
    InvalidKey { reason: String },

    // Batch input errors
    #[error("Invalid batch {}: {reason}", .path.display())]
    InvalidBatch { path: PathBuf, reason: String },
}

impl StoreError {
    /// Create a corrupt store error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptStore { path: path.into(), reason: reason.into() }
    }

    /// Create an invalid batch error
    pub fn invalid_batch(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidBatch { path: path.into(), reason: reason.into() }
    }

    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey { reason: reason.into() }
    }

    /// Check if error is recoverable by retrying the same operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Read { .. } | Self::Write { .. } => true,

            Self::CorruptStore { .. }
            | Self::MissingKey { .. }
            | Self::InvalidKey { .. }
            | Self::InvalidBatch { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::CorruptStore { .. } | Self::Read { .. } | Self::Write { .. } => "store",
            Self::MissingKey { .. } | Self::InvalidKey { .. } => "merge",
            Self::InvalidBatch { .. } => "batch",
        }
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
