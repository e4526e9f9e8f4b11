//! Batch ingestion: one bulk upsert per record type, per-file status tracking

use super::types::{Batch, BatchResult, IngestTotals};
use super::BatchSink;
use crate::classifier::{ParsedRecord, RecordClassifier};
use crate::error::IngestError;
use crate::database::{
    now_millis, path_key, unix_millis, FileRecord, FileStatus, FileTrackingStore, RecordSink,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Converts flushed batches into loaded records and tracking rows.
///
/// Cheap to clone; clones share counters. Concurrent `process` calls are
/// safe because every write is a path-keyed upsert.
#[derive(Clone)]
pub struct BatchIngestor {
    store: Arc<dyn FileTrackingStore>,
    sink: Arc<dyn RecordSink>,
    classifier: Arc<dyn RecordClassifier>,
    retry_individually: bool,
    totals: Arc<Mutex<IngestTotals>>,
}

/// A path stat'ed at the start of processing
struct Observed {
    key: String,
    mtime: i64,
    size_bytes: i64,
}

impl Observed {
    fn indexed(&self, record_type: &str, now: i64) -> FileRecord {
        FileRecord {
            path: self.key.clone(),
            record_type: Some(record_type.to_string()),
            mtime: self.mtime,
            size_bytes: self.size_bytes,
            status: FileStatus::Indexed,
            error_message: None,
            last_indexed_at: Some(now),
        }
    }

    fn failed(&self, record_type: Option<&str>, message: String) -> FileRecord {
        FileRecord {
            path: self.key.clone(),
            record_type: record_type.map(str::to_string),
            mtime: self.mtime,
            size_bytes: self.size_bytes,
            status: FileStatus::Error,
            error_message: Some(message),
            last_indexed_at: None,
        }
    }

    /// Row for a failure that may succeed next time: `pending` is re-queued by
    /// the reconciler, `error` waits for the file to change
    fn unloaded(&self, record_type: Option<&str>, err: &IngestError) -> FileRecord {
        let mut record = self.failed(record_type, err.to_string());
        if err.is_transient() {
            record.status = FileStatus::Pending;
        }
        record
    }
}

impl BatchIngestor {
    pub fn new(
        store: Arc<dyn FileTrackingStore>,
        sink: Arc<dyn RecordSink>,
        classifier: Arc<dyn RecordClassifier>,
    ) -> Self {
        Self {
            store,
            sink,
            classifier,
            retry_individually: true,
            totals: Arc::new(Mutex::new(IngestTotals::default())),
        }
    }

    /// Retry a failed group file by file (default on)
    pub fn with_individual_retry(mut self, enabled: bool) -> Self {
        self.retry_individually = enabled;
        self
    }

    /// Process one batch. Never fails as a whole: every path ends up
    /// `indexed`, `error`, or skipped because it no longer exists. Transient
    /// failures are counted as errors but leave the row `pending`.
    pub fn process(&self, batch: &[PathBuf]) -> BatchResult {
        let start_time = Instant::now();
        let mut result = BatchResult::default();

        let observed: Vec<(PathBuf, Observed)> = batch
            .iter()
            .filter_map(|path| match observe(path) {
                Some(obs) => Some((path.clone(), obs)),
                None => {
                    result.skipped_count += 1;
                    None
                }
            })
            .collect();

        if observed.is_empty() {
            self.record_totals(&result);
            return result;
        }

        // First detection creates the row; a changed file goes back to pending
        let pending: Vec<FileRecord> = observed
            .iter()
            .map(|(_, obs)| FileRecord::pending(obs.key.clone(), obs.mtime, obs.size_bytes))
            .collect();
        if let Err(e) = self.store.bulk_upsert(&pending) {
            warn!("Failed to mark {} files pending: {}", pending.len(), e);
        }

        let mut outcomes: Vec<FileRecord> = Vec::with_capacity(observed.len());
        let mut groups: BTreeMap<String, Vec<(Observed, ParsedRecord)>> = BTreeMap::new();

        for (path, obs) in observed {
            match self.classifier.classify(&path) {
                Ok(parsed) => groups
                    .entry(parsed.record_type.clone())
                    .or_default()
                    .push((obs, parsed)),
                Err(e) => {
                    debug!("Classification failed for {}: {}", path.display(), e);
                    result.error_count += 1;
                    outcomes.push(obs.unloaded(None, &e));
                }
            }
        }

        for (record_type, members) in groups {
            let (indexed, failed) = self.load_group(&record_type, members);
            result.processed_count += indexed.len();
            result.error_count += failed.len();
            if !indexed.is_empty() {
                *result.per_type.entry(record_type).or_insert(0) += indexed.len();
            }
            outcomes.extend(indexed);
            outcomes.extend(failed);
        }

        if let Err(e) = self.store.bulk_upsert(&outcomes) {
            // Rows stay pending; the next reconciliation picks them up again
            error!(
                "Failed to record status for {} files: {}",
                outcomes.len(),
                e
            );
        }

        self.record_totals(&result);
        info!(
            "Processed batch of {} files in {}ms: {} indexed, {} errors, {} skipped",
            batch.len(),
            start_time.elapsed().as_millis(),
            result.processed_count,
            result.error_count,
            result.skipped_count
        );
        result
    }

    /// Load one type-group. Returns (indexed, failed) tracking rows.
    fn load_group(
        &self,
        record_type: &str,
        members: Vec<(Observed, ParsedRecord)>,
    ) -> (Vec<FileRecord>, Vec<FileRecord>) {
        let now = now_millis();
        let (observed, records): (Vec<Observed>, Vec<ParsedRecord>) = members.into_iter().unzip();

        match self.sink.bulk_upsert(record_type, &records) {
            Ok(()) => {
                debug!("Loaded {} {} records", records.len(), record_type);
                let indexed = observed
                    .iter()
                    .map(|obs| obs.indexed(record_type, now))
                    .collect();
                (indexed, Vec::new())
            }
            Err(group_err) if self.retry_individually && records.len() > 1 => {
                warn!(
                    "Bulk load of {} {} records failed ({}), retrying file by file",
                    records.len(),
                    record_type,
                    group_err
                );
                let mut indexed = Vec::new();
                let mut failed = Vec::new();
                for (obs, record) in observed.iter().zip(records.iter()) {
                    match self.sink.bulk_upsert(record_type, std::slice::from_ref(record)) {
                        Ok(()) => indexed.push(obs.indexed(record_type, now)),
                        Err(e) => {
                            warn!("Failed to load {}: {}", obs.key, e);
                            failed.push(obs.unloaded(Some(record_type), &e));
                        }
                    }
                }
                (indexed, failed)
            }
            Err(group_err) => {
                warn!(
                    "Bulk load of {} {} records failed: {}",
                    records.len(),
                    record_type,
                    group_err
                );
                let failed = observed
                    .iter()
                    .map(|obs| obs.unloaded(Some(record_type), &group_err))
                    .collect();
                (Vec::new(), failed)
            }
        }
    }

    fn record_totals(&self, result: &BatchResult) {
        let mut totals = match self.totals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        totals.batches_processed += 1;
        totals.files_indexed += result.processed_count as u64;
        totals.files_failed += result.error_count as u64;
        totals.files_skipped += result.skipped_count as u64;
    }

    pub fn totals(&self) -> IngestTotals {
        match self.totals.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl BatchSink for BatchIngestor {
    async fn handle_batch(&self, batch: Batch) {
        let ingestor = self.clone();
        let size = batch.len();
        // File reads and SQLite writes block
        if let Err(e) = tokio::task::spawn_blocking(move || ingestor.process(&batch)).await {
            error!("Batch of {} files aborted: {}", size, e);
        }
    }
}

/// Stat `path`; None if it vanished or is not a regular file
fn observe(path: &Path) -> Option<Observed> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Skipping {}: {}", path.display(), e);
            return None;
        }
    };
    if !metadata.is_file() {
        debug!("Skipping {}: not a regular file", path.display());
        return None;
    }

    let mtime = metadata.modified().map(unix_millis).unwrap_or(0);
    Some(Observed {
        key: path_key(path),
        mtime,
        size_bytes: metadata.len() as i64,
    })
}
