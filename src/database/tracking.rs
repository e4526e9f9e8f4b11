// File tracking operations

use super::*;
use rusqlite::{params, OptionalExtension, Row};

const UPSERT_SQL: &str = "INSERT INTO file_tracking
     (path, record_type, mtime, size_bytes, status, error_message, last_indexed_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(path) DO UPDATE SET
         record_type = COALESCE(excluded.record_type, file_tracking.record_type),
         mtime = excluded.mtime,
         size_bytes = excluded.size_bytes,
         status = excluded.status,
         error_message = excluded.error_message,
         last_indexed_at = COALESCE(excluded.last_indexed_at, file_tracking.last_indexed_at)";

const SELECT_COLUMNS: &str =
    "SELECT path, record_type, mtime, size_bytes, status, error_message, last_indexed_at
     FROM file_tracking";

fn row_to_record(row: &Row) -> rusqlite::Result<FileRecord> {
    let status: String = row.get(4)?;
    let status = status.parse::<FileStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e)),
        )
    })?;

    Ok(FileRecord {
        path: row.get(0)?,
        record_type: row.get(1)?,
        mtime: row.get(2)?,
        size_bytes: row.get(3)?,
        status,
        error_message: row.get(5)?,
        last_indexed_at: row.get(6)?,
    })
}

impl FileTrackingStore for IngestDatabase {
    fn get(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                &format!("{} WHERE path = ?1", SELECT_COLUMNS),
                params![path],
                row_to_record,
            )
            .optional()
            .map_err(transient)?;
        Ok(record)
    }

    fn upsert(&self, record: &FileRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            UPSERT_SQL,
            params![
                record.path,
                record.record_type,
                record.mtime,
                record.size_bytes,
                record.status.as_str(),
                record.error_message,
                record.last_indexed_at
            ],
        )
        .map_err(transient)?;

        debug!("Tracked {} as {}", record.path, record.status);
        Ok(())
    }

    fn bulk_upsert(&self, records: &[FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(transient)?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for record in records {
                stmt.execute(params![
                    record.path,
                    record.record_type,
                    record.mtime,
                    record.size_bytes,
                    record.status.as_str(),
                    record.error_message,
                    record.last_indexed_at
                ])
                .map_err(transient)?;
            }
        }
        tx.commit().map_err(transient)?;

        debug!("Tracked {} files in one transaction", records.len());
        Ok(())
    }

    fn snapshot(&self) -> Result<HashMap<String, FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(SELECT_COLUMNS).map_err(transient)?;
        let rows = stmt.query_map([], row_to_record).map_err(transient)?;

        let mut records = HashMap::new();
        for row in rows {
            let record = row?;
            records.insert(record.path.clone(), record);
        }
        Ok(records)
    }
}

impl IngestDatabase {
    /// Row counts per status for the status report
    pub fn tracking_stats(&self) -> Result<TrackingStats> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM file_tracking GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats = TrackingStats::default();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<FileStatus>() {
                Ok(FileStatus::Pending) => stats.pending = count,
                Ok(FileStatus::Indexed) => stats.indexed = count,
                Ok(FileStatus::Error) => stats.error = count,
                Err(e) => warn!("Ignoring tracking row with {}", e),
            }
        }
        Ok(stats)
    }

    /// Most recently modified files currently in `status=error`
    pub fn recent_errors(&self, limit: usize) -> Result<Vec<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status = 'error' ORDER BY mtime DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
