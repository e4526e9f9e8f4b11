use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the ingestion pipeline
///
/// Only `Configuration` (and wrapped start-up failures) ever crosses the
/// orchestration boundary. Everything else is caught inside background work
/// and surfaced through stats counters or `status=error` tracking rows.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Storage temporarily unavailable: {0}")]
    TransientIo(String),

    #[error("Malformed record {}: {reason}", path.display())]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl IngestError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying at the next flush or scan may succeed.
    ///
    /// Busy and locked SQLite errors arrive here as `TransientIo`; any other
    /// database error is permanent for the record that caused it.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::TransientIo(_) | IngestError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
