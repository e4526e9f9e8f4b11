// Session Ingest - Micro-batched File Ingestion Library
//!
//! Session Ingest keeps an analytical store of agent-session files in sync
//! with the directory they are written to. Live file events and periodic
//! reconciliation scans feed one deduplicating accumulator, whose batches are
//! bulk-loaded by record type.

pub mod classifier;
pub mod config;
pub mod database;
pub mod error;
pub mod pipeline;
pub mod watcher;

#[cfg(test)]
pub mod tests;

// Re-export common types
pub use classifier::{ParsedRecord, RecordClassifier, SessionFileClassifier};
pub use config::IngestConfig;
pub use database::{FileRecord, FileStatus, FileTrackingStore, IngestDatabase, RecordSink};
pub use error::{IngestError, Result};
pub use pipeline::{
    BatchIngestor, BatchResult, FileBatchAccumulator, Orchestrator, OrchestratorState,
    PipelineConfig, PipelineStats, Reconciler,
};
pub use watcher::{ChangeDetector, NotifyChangeDetector};
