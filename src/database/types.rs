// Database type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion status of a tracked file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Indexed,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Error => "error",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "indexed" => Ok(FileStatus::Indexed),
            "error" => Ok(FileStatus::Error),
            other => Err(format!("unknown file status '{}'", other)),
        }
    }
}

/// One row of the file tracking table, keyed by path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub record_type: Option<String>,
    pub mtime: i64, // Unix timestamp, milliseconds
    pub size_bytes: i64,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub last_indexed_at: Option<i64>, // Unix timestamp, milliseconds
}

impl FileRecord {
    pub fn pending(path: impl Into<String>, mtime: i64, size_bytes: i64) -> Self {
        Self {
            path: path.into(),
            record_type: None,
            mtime,
            size_bytes,
            status: FileStatus::Pending,
            error_message: None,
            last_indexed_at: None,
        }
    }

    /// True when the file on disk no longer matches what was recorded
    pub fn is_stale(&self, mtime: i64, size_bytes: i64) -> bool {
        mtime > self.mtime || size_bytes != self.size_bytes
    }
}

/// Per-status row counts for the status report
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackingStats {
    pub pending: i64,
    pub indexed: i64,
    pub error: i64,
}

impl TrackingStats {
    pub fn total(&self) -> i64 {
        self.pending + self.indexed + self.error
    }
}
