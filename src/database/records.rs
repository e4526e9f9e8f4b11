// Analytical store load path: session records and their entries

use super::*;
use rusqlite::params;

impl RecordSink for IngestDatabase {
    /// Replace every path's rows in one transaction.
    ///
    /// Any failure rolls back the whole group, so a group is either fully
    /// loaded or untouched.
    fn bulk_upsert(&self, record_type: &str, records: &[ParsedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let start_time = std::time::Instant::now();
        let now = now_millis();

        let mut conn = self.lock();
        let tx = conn.transaction().map_err(transient)?;
        {
            let mut upsert_record = tx.prepare_cached(
                "INSERT INTO session_records (path, record_type, session_id, entry_count, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path) DO UPDATE SET
                     record_type = excluded.record_type,
                     session_id = excluded.session_id,
                     entry_count = excluded.entry_count,
                     ingested_at = excluded.ingested_at",
            )?;
            let mut clear_entries =
                tx.prepare_cached("DELETE FROM session_entries WHERE path = ?1")?;
            let mut insert_entry = tx.prepare_cached(
                "INSERT INTO session_entries (path, line, entry_type, timestamp, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for record in records {
                let path = path_key(&record.path);
                upsert_record
                    .execute(params![
                        path,
                        record_type,
                        record.session_id,
                        record.entries.len() as i64,
                        now
                    ])
                    .map_err(transient)?;
                clear_entries.execute(params![path]).map_err(transient)?;

                for entry in &record.entries {
                    insert_entry
                        .execute(params![
                            path,
                            entry.line as i64,
                            entry.entry_type,
                            entry.timestamp,
                            entry.body.to_string()
                        ])
                        .map_err(transient)?;
                }
            }
        }
        tx.commit().map_err(transient)?;

        debug!(
            "Loaded {} {} records in {}ms",
            records.len(),
            record_type,
            start_time.elapsed().as_millis()
        );
        Ok(())
    }
}

impl IngestDatabase {
    pub fn count_session_records(&self) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM session_records", [], |row| row.get(0))?)
    }

    pub fn count_session_entries(&self, path: &Path) -> Result<i64> {
        let conn = self.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM session_entries WHERE path = ?1",
            params![path_key(path)],
            |row| row.get(0),
        )?)
    }

    /// Loaded record counts grouped by record type
    pub fn session_record_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT record_type, COUNT(*) FROM session_records
             GROUP BY record_type ORDER BY record_type",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}
