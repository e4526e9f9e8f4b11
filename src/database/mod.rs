//! Session Ingest's Database Module - SQLite tracking table and analytical load path
//!
//! One SQLite file holds both sides of the pipeline's storage:
//! - `file_tracking`: per-path ingestion status (the single-writer table)
//! - `session_records` / `session_entries`: the analytical store fed by bulk upserts

use crate::classifier::ParsedRecord;
use crate::error::{IngestError, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

mod records;
mod schema;
mod tracking;
pub mod types;

pub use schema::LATEST_SCHEMA_VERSION;
pub use types::*;

/// Per-path ingestion status, keyed by path.
///
/// Only the batch ingestor writes through this trait; the reconciler reads
/// `snapshot` to diff the filesystem against it.
pub trait FileTrackingStore: Send + Sync {
    fn get(&self, path: &str) -> Result<Option<FileRecord>>;

    fn upsert(&self, record: &FileRecord) -> Result<()>;

    /// Upsert all records in one transaction
    fn bulk_upsert(&self, records: &[FileRecord]) -> Result<()>;

    /// Every tracked record, keyed by path
    fn snapshot(&self) -> Result<HashMap<String, FileRecord>>;
}

/// Load path into the analytical store
pub trait RecordSink: Send + Sync {
    /// Upsert every record of one type as a single bulk operation.
    ///
    /// Keyed by path, so replaying the same records is idempotent.
    fn bulk_upsert(&self, record_type: &str, records: &[ParsedRecord]) -> Result<()>;
}

/// The database connection shared by the tracking store and the record sink
pub struct IngestDatabase {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) file_path: PathBuf,
}

impl IngestDatabase {
    /// Open (or create) the database and initialize the schema
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let file_path = db_path.as_ref().to_path_buf();

        info!("Initializing SQLite database at: {}", file_path.display());

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&file_path)?;

        // Concurrent flushes share this file - wait up to 5 seconds for locks
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "wal_autocheckpoint", 2000)?;

        let db = Self {
            conn: Mutex::new(conn),
            file_path,
        };
        db.initialize_schema()?;

        info!("Database initialized successfully");
        Ok(db)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Database mutex poisoned, recovering: {}", poisoned);
                poisoned.into_inner()
            }
        }
    }

    /// Checkpoint the WAL so the main file reflects every committed batch
    pub fn checkpoint_wal(&self) -> Result<(i32, i32, i32)> {
        let conn = self.lock();
        let result = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        debug!(
            "WAL checkpoint complete: busy={}, log={}, checkpointed={}",
            result.0, result.1, result.2
        );
        Ok(result)
    }
}

/// Tracking-table key for a path
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Milliseconds since the Unix epoch for `time`
pub fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn now_millis() -> i64 {
    unix_millis(SystemTime::now())
}

/// Map a locked or unreachable database to a retryable error
pub(crate) fn transient(e: rusqlite::Error) -> IngestError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            IngestError::TransientIo(e.to_string())
        }
        _ => IngestError::Database(e),
    }
}
