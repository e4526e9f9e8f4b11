//! In-process stand-ins for the pipeline's collaborators

use crate::classifier::ParsedRecord;
use crate::database::{FileRecord, FileTrackingStore, IngestDatabase, RecordSink};
use crate::error::{IngestError, Result};
use crate::pipeline::{Batch, BatchSink};
use crate::watcher::{ChangeCallback, ChangeDetector, ChangeEvent, ChangeKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Records every batch it receives, optionally after a delay
#[derive(Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<Batch>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn total_files(&self) -> usize {
        self.batches().iter().map(|b| b.len()).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` batches arrived or `timeout` passes
    pub async fn wait_for_batches(&self, count: usize, timeout: Duration) -> Vec<Batch> {
        let deadline = Instant::now() + timeout;
        loop {
            let batches = self.batches();
            if batches.len() >= count || Instant::now() >= deadline {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl BatchSink for CollectingSink {
    async fn handle_batch(&self, batch: Batch) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.lock().unwrap().push(batch);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Record sink over a real database that fails on demand
pub struct FlakySink {
    inner: Arc<IngestDatabase>,
    failing_types: HashSet<String>,
    poisoned_names: HashSet<String>,
    calls: AtomicUsize,
}

impl FlakySink {
    pub fn new(inner: Arc<IngestDatabase>) -> Self {
        Self {
            inner,
            failing_types: HashSet::new(),
            poisoned_names: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every bulk upsert of this record type fails
    pub fn failing_type(mut self, record_type: &str) -> Self {
        self.failing_types.insert(record_type.to_string());
        self
    }

    /// Any upsert containing a file with this name fails
    pub fn poisoned(mut self, file_name: &str) -> Self {
        self.poisoned_names.insert(file_name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RecordSink for FlakySink {
    fn bulk_upsert(&self, record_type: &str, records: &[ParsedRecord]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_types.contains(record_type) {
            return Err(IngestError::TransientIo(format!(
                "{} table rejected the load",
                record_type
            )));
        }
        let poisoned = records.iter().find(|record| {
            record
                .path
                .file_name()
                .is_some_and(|name| self.poisoned_names.contains(&*name.to_string_lossy()))
        });
        if let Some(record) = poisoned {
            return Err(IngestError::malformed(&record.path, "rejected by sink"));
        }
        RecordSink::bulk_upsert(&*self.inner, record_type, records)
    }
}

/// Tracking store whose every call fails
pub struct UnavailableStore;

impl FileTrackingStore for UnavailableStore {
    fn get(&self, _path: &str) -> Result<Option<FileRecord>> {
        Err(IngestError::TransientIo("store offline".to_string()))
    }

    fn upsert(&self, _record: &FileRecord) -> Result<()> {
        Err(IngestError::TransientIo("store offline".to_string()))
    }

    fn bulk_upsert(&self, _records: &[FileRecord]) -> Result<()> {
        Err(IngestError::TransientIo("store offline".to_string()))
    }

    fn snapshot(&self) -> Result<HashMap<String, FileRecord>> {
        Err(IngestError::TransientIo("store offline".to_string()))
    }
}

/// Change detector driven by the test through a cloned handle
#[derive(Clone, Default)]
pub struct ManualChangeDetector {
    callback: Arc<Mutex<Option<ChangeCallback>>>,
    root: Arc<Mutex<Option<PathBuf>>>,
    fail_subscribe: bool,
}

impl ManualChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector whose `subscribe` always fails
    pub fn failing() -> Self {
        Self {
            fail_subscribe: true,
            ..Default::default()
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.callback.lock().unwrap().is_some()
    }

    pub fn subscribed_root(&self) -> Option<PathBuf> {
        self.root.lock().unwrap().clone()
    }

    /// Deliver one event; returns false if nobody is subscribed
    pub fn emit(&self, kind: ChangeKind, path: &Path) -> bool {
        let callback = self.callback.lock().unwrap().clone();
        match callback {
            Some(callback) => {
                callback(ChangeEvent {
                    kind,
                    path: path.to_path_buf(),
                });
                true
            }
            None => false,
        }
    }
}

impl ChangeDetector for ManualChangeDetector {
    fn subscribe(&mut self, root: &Path, callback: ChangeCallback) -> Result<()> {
        if self.fail_subscribe {
            return Err(IngestError::Runtime("watch limit reached".to_string()));
        }
        *self.callback.lock().unwrap() = Some(callback);
        *self.root.lock().unwrap() = Some(root.to_path_buf());
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        *self.callback.lock().unwrap() = None;
        Ok(())
    }
}
