//! Type definitions shared by the pipeline components
//!
//! Configuration structs, the batch hand-off type, and the stats snapshots
//! each component reports.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Paths handed from the accumulator to the ingestor in one flush
pub type Batch = Vec<PathBuf>;

/// Outcome of processing one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub processed_count: usize,
    pub error_count: usize,
    /// Paths that vanished (or stopped being regular files) before ingest
    pub skipped_count: usize,
    pub per_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorConfig {
    pub window_duration: Duration,
    pub max_batch_size: usize,
    pub flush_on_stop: bool,
    /// Upper bound on flush callbacks running at once
    pub max_in_flight_flushes: usize,
    /// Dispatched batches allowed to wait for a running slot. Beyond that,
    /// size and window flushes are deferred and paths stay in the pending set.
    pub max_queued_flushes: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            window_duration: Duration::from_millis(500),
            max_batch_size: 100,
            flush_on_stop: true,
            max_in_flight_flushes: 4,
            max_queued_flushes: 16,
        }
    }
}

impl AccumulatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_duration.is_zero() {
            return Err(IngestError::Configuration(
                "accumulator window must be positive".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(IngestError::Configuration(
                "max batch size must be positive".to_string(),
            ));
        }
        if self.max_in_flight_flushes == 0 {
            return Err(IngestError::Configuration(
                "max in-flight flushes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Most batches that may be dispatched and unfinished at once
    pub fn max_outstanding_flushes(&self) -> usize {
        self.max_in_flight_flushes + self.max_queued_flushes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub scan_interval: Duration,
    pub storage_root: PathBuf,
    /// Globs (relative to the storage root) a file must match to be eligible
    pub include_patterns: Vec<String>,
    /// Cap on paths returned by a single scan
    pub max_results: usize,
    /// Stop-flag polling granularity of the background loop
    pub tick: Duration,
    pub join_timeout: Duration,
}

impl ReconcilerConfig {
    pub fn new(storage_root: impl Into<PathBuf>, scan_interval: Duration) -> Self {
        Self {
            scan_interval,
            storage_root: storage_root.into(),
            include_patterns: default_include_patterns(),
            max_results: 10_000,
            tick: Duration::from_millis(100),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan_interval.is_zero() {
            return Err(IngestError::Configuration(
                "reconciler interval must be positive".to_string(),
            ));
        }
        if self.tick.is_zero() {
            return Err(IngestError::Configuration(
                "reconciler tick must be positive".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(IngestError::Configuration(
                "reconciler result cap must be positive".to_string(),
            ));
        }
        if !self.storage_root.is_dir() {
            return Err(IngestError::Configuration(format!(
                "storage root {} is not a directory",
                self.storage_root.display()
            )));
        }
        if self.include_patterns.is_empty() {
            return Err(IngestError::Configuration(
                "at least one include pattern is required".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn default_include_patterns() -> Vec<String> {
    vec!["**/*.jsonl".to_string(), "**/*.json".to_string()]
}

/// Everything the orchestrator needs, supplied once at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub accumulator: AccumulatorConfig,
    pub reconciler: ReconcilerConfig,
    /// Retry a failed type-group file by file to pinpoint bad records
    pub retry_individually: bool,
    pub shutdown_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            accumulator: AccumulatorConfig::default(),
            reconciler: ReconcilerConfig::new(storage_root, Duration::from_secs(60)),
            retry_individually: true,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.accumulator.validate()?;
        self.reconciler.validate()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub batches_sent: u64,
    pub files_sent: u64,
    pub pending_count: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub scans_completed: u64,
    pub files_found_missing: u64,
    pub last_scan_duration_ms: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub scan_errors: u64,
}

/// Cumulative ingestor counters across all batches
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestTotals {
    pub batches_processed: u64,
    pub files_indexed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub accumulator: AccumulatorStats,
    pub reconciler: ReconcilerStats,
    pub ingest: IngestTotals,
}
