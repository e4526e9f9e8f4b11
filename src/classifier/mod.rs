//! Record classification
//!
//! Given a path, a classifier decides which record type the file holds and
//! parses it into entries ready for the analytical store. The ingestor calls
//! it exactly once per file per batch.

mod session;

pub use session::{default_rules, ClassifierRule, SessionFileClassifier};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single parsed line (or element) of a session file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub line: usize,
    pub entry_type: Option<String>,
    pub timestamp: Option<String>,
    pub body: serde_json::Value,
}

/// A classified and parsed file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub path: PathBuf,
    pub record_type: String,
    pub session_id: Option<String>,
    pub entries: Vec<SessionEntry>,
}

pub trait RecordClassifier: Send + Sync {
    /// Classify and parse `path`.
    ///
    /// Returns `IngestError::MalformedRecord` when no record type matches or
    /// the content cannot be parsed.
    fn classify(&self, path: &Path) -> Result<ParsedRecord>;
}
