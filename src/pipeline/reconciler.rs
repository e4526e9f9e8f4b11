//! Periodic reconciliation of the storage root against the tracking table
//!
//! Live events are a best-effort hint. The reconciler is what guarantees
//! eventual completeness: every scan re-derives the backlog from the
//! filesystem and pushes it through the accumulator. It never writes the
//! tracking table itself.

use super::accumulator::FileBatchAccumulator;
use super::types::{ReconcilerConfig, ReconcilerStats};
use crate::database::{path_key, unix_millis, FileStatus, FileTrackingStore};
use crate::error::{IngestError, Result};
use crate::watcher::EligibilityFilter;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Reconciler {
    inner: Arc<ReconcilerInner>,
    worker: Mutex<Option<Worker>>,
}

struct ReconcilerInner {
    config: ReconcilerConfig,
    filter: EligibilityFilter,
    store: Arc<dyn FileTrackingStore>,
    accumulator: FileBatchAccumulator,
    stats: Mutex<ReconcilerStats>,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// An eligible file as found on disk
struct DiskFile {
    path: PathBuf,
    mtime: i64,
    size_bytes: i64,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn FileTrackingStore>,
        accumulator: FileBatchAccumulator,
    ) -> Result<Self> {
        let filter = EligibilityFilter::new(&config.storage_root, &config.include_patterns)?;
        Ok(Self {
            inner: Arc::new(ReconcilerInner {
                config,
                filter,
                store,
                accumulator,
                stats: Mutex::new(ReconcilerStats::default()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Launch the background loop on the current runtime
    pub fn start(&self) -> Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| IngestError::Runtime(e.to_string()))?;

        let mut worker = self.lock_worker();
        if worker.is_some() {
            warn!("Reconciler already running");
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let loop_stop = stop.clone();
        let handle = runtime.spawn(async move { inner.run_loop(loop_stop).await });

        info!(
            "Reconciler started (interval {:?}, root {})",
            self.inner.config.scan_interval,
            self.inner.config.storage_root.display()
        );
        *worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Signal the loop and wait for it, at most `join_timeout`.
    ///
    /// Returns false if the worker did not finish in time; it is left to
    /// finish its current scan on its own.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.lock_worker().take() else {
            return true;
        };

        worker.stop.store(true, Ordering::SeqCst);
        let timeout = self.inner.config.join_timeout;
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(Ok(())) => {
                info!("Reconciler stopped");
                true
            }
            Ok(Err(e)) => {
                error!("Reconciler worker ended abnormally: {}", e);
                true
            }
            Err(_) => {
                warn!("Reconciler: {}", IngestError::ShutdownTimeout(timeout));
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker().is_some()
    }

    /// One synchronous scan. Returns the paths that need ingesting, most
    /// recently modified first, capped at `max_results`.
    pub fn scan_now(&self) -> Result<Vec<PathBuf>> {
        self.inner.scan_now()
    }

    /// Scan and feed the result to the accumulator. Returns the count fed.
    pub fn reconcile(&self) -> Result<usize> {
        self.inner.reconcile()
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.inner.lock_stats().clone()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ReconcilerInner {
    async fn run_loop(self: Arc<Self>, stop: Arc<AtomicBool>) {
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut since_scan = std::time::Duration::ZERO;

        info!("Background reconciliation loop started");
        loop {
            tick.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            since_scan += self.config.tick;
            if since_scan < self.config.scan_interval {
                continue;
            }
            since_scan = std::time::Duration::ZERO;

            let inner = self.clone();
            match tokio::task::spawn_blocking(move || inner.reconcile()).await {
                Ok(Ok(count)) => debug!("Periodic reconciliation queued {} files", count),
                Ok(Err(e)) => warn!("Reconciliation scan failed, retrying next interval: {}", e),
                Err(e) => error!("Reconciliation scan aborted: {}", e),
            }
        }
        info!("Background reconciliation loop exited");
    }

    fn reconcile(&self) -> Result<usize> {
        let paths = self.scan_now()?;
        let count = paths.len();
        if count > 0 {
            self.accumulator.add_many(paths);
        }
        Ok(count)
    }

    fn scan_now(&self) -> Result<Vec<PathBuf>> {
        let start_time = Instant::now();
        match self.diff() {
            Ok(paths) => {
                let elapsed = start_time.elapsed();
                let mut stats = self.lock_stats();
                stats.scans_completed += 1;
                stats.files_found_missing += paths.len() as u64;
                stats.last_scan_duration_ms = elapsed.as_millis() as u64;
                stats.last_scan_at = Some(Utc::now());
                drop(stats);

                info!(
                    "Reconciliation scan found {} files needing ingest in {}ms",
                    paths.len(),
                    elapsed.as_millis()
                );
                Ok(paths)
            }
            Err(e) => {
                self.lock_stats().scan_errors += 1;
                Err(e)
            }
        }
    }

    /// Diff eligible files on disk against the tracking table
    fn diff(&self) -> Result<Vec<PathBuf>> {
        let on_disk = self.enumerate()?;
        let tracked = self.store.snapshot()?;

        let mut missing = 0usize;
        let mut modified = 0usize;
        let mut backlog: Vec<DiskFile> = on_disk
            .into_iter()
            .filter(|file| match tracked.get(&path_key(&file.path)) {
                None => {
                    missing += 1;
                    true
                }
                // An interrupted batch left it pending
                Some(record) if record.status == FileStatus::Pending => {
                    missing += 1;
                    true
                }
                Some(record) => {
                    let stale = record.is_stale(file.mtime, file.size_bytes);
                    if stale {
                        modified += 1;
                    }
                    stale
                }
            })
            .collect();

        debug!(
            "Scan diff: {} tracked, {} missing, {} modified",
            tracked.len(),
            missing,
            modified
        );

        backlog.sort_by(|a, b| b.mtime.cmp(&a.mtime));
        if backlog.len() > self.config.max_results {
            warn!(
                "Backlog of {} files exceeds cap, queueing the {} most recent",
                backlog.len(),
                self.config.max_results
            );
            backlog.truncate(self.config.max_results);
        }

        Ok(backlog.into_iter().map(|file| file.path).collect())
    }

    fn enumerate(&self) -> Result<Vec<DiskFile>> {
        let root = &self.config.storage_root;
        if !root.is_dir() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("storage root {} is not a directory", root.display()),
            )));
        }

        let mut files = Vec::new();
        // Never filter the root itself, even if it is hidden
        for entry in walkdir::WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.filter.is_hidden(e.path()))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.filter.is_eligible(entry.path()) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            files.push(DiskFile {
                path: entry.into_path(),
                mtime: metadata.modified().map(unix_millis).unwrap_or(0),
                size_bytes: metadata.len() as i64,
            });
        }

        Ok(files)
    }

    fn lock_stats(&self) -> MutexGuard<'_, ReconcilerStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
