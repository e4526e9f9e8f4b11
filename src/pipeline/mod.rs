//! Micro-batched ingestion pipeline
//!
//! # Architecture
//!
//! Two producers feed one load path:
//! 1. **Live events** → the change detector forwards paths to the accumulator
//! 2. **Reconciliation** → a background scan diffs the storage root against
//!    the tracking table and forwards the gaps
//!
//! The accumulator deduplicates paths and flushes them by size or time to the
//! batch ingestor, which loads one bulk upsert per record type and is the only
//! writer of the tracking table. The orchestrator owns all three.

mod accumulator;
mod ingestor;
mod orchestrator;
mod reconciler;
pub mod types;

pub use accumulator::FileBatchAccumulator;
pub use ingestor::BatchIngestor;
pub use orchestrator::{Orchestrator, OrchestratorState, reconcile_once};
pub use reconciler::Reconciler;
pub use types::*;

use async_trait::async_trait;

/// Consumer of flushed batches
///
/// Called on its own task, outside the accumulator's lock. Failures belong
/// to the implementation; nothing it does can corrupt the pending set.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn handle_batch(&self, batch: Batch);
}
