// Database schema initialization and table creation

use super::*;
use rusqlite::params;
use tracing::debug;

/// Current schema version - increment when changing table layout
pub const LATEST_SCHEMA_VERSION: i32 = 1;

impl IngestDatabase {
    /// Initialize the complete database schema
    pub(super) fn initialize_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        let conn = self.lock();
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL,
                description TEXT NOT NULL
            )",
            [],
        )?;

        Self::create_file_tracking_table(&conn)?;
        Self::create_session_tables(&conn)?;

        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at, description)
             VALUES (?1, ?2, ?3)",
            params![
                LATEST_SCHEMA_VERSION,
                now_millis(),
                "file tracking and session tables"
            ],
        )?;

        debug!("Database schema created successfully");
        Ok(())
    }

    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.lock();
        let version = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Create the file tracking table (one row per path)
    fn create_file_tracking_table(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_tracking (
                path TEXT PRIMARY KEY,
                record_type TEXT,
                mtime INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                status TEXT NOT NULL CHECK(status IN ('pending', 'indexed', 'error')),
                error_message TEXT,
                last_indexed_at INTEGER
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_file_tracking_status ON file_tracking(status)",
            [],
        )?;

        debug!("Created file_tracking table and indexes");
        Ok(())
    }

    /// Create the analytical session tables
    fn create_session_tables(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_records (
                path TEXT PRIMARY KEY,
                record_type TEXT NOT NULL,
                session_id TEXT,
                entry_count INTEGER NOT NULL DEFAULT 0,
                ingested_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_entries (
                path TEXT NOT NULL REFERENCES session_records(path) ON DELETE CASCADE,
                line INTEGER NOT NULL,
                entry_type TEXT,
                timestamp TEXT,
                body TEXT NOT NULL,
                PRIMARY KEY (path, line)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_records_type ON session_records(record_type)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_records_session ON session_records(session_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_entries_type ON session_entries(entry_type)",
            [],
        )?;

        debug!("Created session tables and indexes");
        Ok(())
    }
}
