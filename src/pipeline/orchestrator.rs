//! Lifecycle owner for the accumulator, reconciler and ingestor

use super::accumulator::FileBatchAccumulator;
use super::ingestor::BatchIngestor;
use super::reconciler::Reconciler;
use super::types::{IngestTotals, PipelineConfig, PipelineStats};
use crate::classifier::RecordClassifier;
use crate::database::{FileTrackingStore, RecordSink};
use crate::error::{IngestError, Result};
use crate::watcher::{ChangeCallback, ChangeDetector, ChangeEvent, EligibilityFilter};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Components that only exist between `start()` and `stop()`
struct Running {
    accumulator: FileBatchAccumulator,
    reconciler: Arc<Reconciler>,
    ingestor: BatchIngestor,
}

/// Owns one accumulator, reconciler and ingestor per process.
///
/// `Stopped → Starting → Running → Stopping → Stopped`. Every `start()`
/// builds fresh components, so a stopped orchestrator can be started again.
pub struct Orchestrator {
    config: PipelineConfig,
    store: Arc<dyn FileTrackingStore>,
    sink: Arc<dyn RecordSink>,
    classifier: Arc<dyn RecordClassifier>,
    detector: Box<dyn ChangeDetector>,
    state: OrchestratorState,
    running: Option<Running>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn FileTrackingStore>,
        sink: Arc<dyn RecordSink>,
        classifier: Arc<dyn RecordClassifier>,
        detector: Box<dyn ChangeDetector>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            classifier,
            detector,
            state: OrchestratorState::Stopped,
            running: None,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Reconcile once, then start the reconciler loop and live events.
    ///
    /// Configuration is validated before any component runs. On failure,
    /// whatever was started is rolled back and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != OrchestratorState::Stopped {
            return Err(IngestError::Runtime(format!(
                "cannot start orchestrator in state {:?}",
                self.state
            )));
        }

        self.state = OrchestratorState::Starting;
        let start_time = Instant::now();

        match self.start_components().await {
            Ok(running) => {
                self.running = Some(running);
                self.state = OrchestratorState::Running;
                info!(
                    "Ingestion pipeline running ({}ms to start)",
                    start_time.elapsed().as_millis()
                );
                Ok(())
            }
            Err(e) => {
                self.state = OrchestratorState::Stopped;
                error!("Failed to start ingestion pipeline: {}", e);
                Err(e)
            }
        }
    }

    async fn start_components(&mut self) -> Result<Running> {
        self.config.validate()?;

        let ingestor = BatchIngestor::new(
            self.store.clone(),
            self.sink.clone(),
            self.classifier.clone(),
        )
        .with_individual_retry(self.config.retry_individually);

        // Stop must drain whatever is pending
        let mut accumulator_config = self.config.accumulator.clone();
        accumulator_config.flush_on_stop = true;
        let accumulator = FileBatchAccumulator::new(accumulator_config, Arc::new(ingestor.clone()))?;

        let reconciler = Arc::new(Reconciler::new(
            self.config.reconciler.clone(),
            self.store.clone(),
            accumulator.clone(),
        )?);

        // Startup reconciliation closes the gap before live events arrive
        let scanner = reconciler.clone();
        let scanned = tokio::task::spawn_blocking(move || scanner.scan_now())
            .await
            .map_err(|e| IngestError::Runtime(e.to_string()))
            .and_then(|result| result);
        let backlog = match scanned {
            Ok(backlog) => backlog,
            Err(e) => {
                accumulator.abort();
                return Err(e);
            }
        };
        info!("Startup reconciliation queued {} files", backlog.len());
        accumulator.add_many(backlog);

        if let Err(e) = reconciler.start() {
            accumulator.abort();
            return Err(e);
        }

        let filter = EligibilityFilter::new(
            &self.config.reconciler.storage_root,
            &self.config.reconciler.include_patterns,
        )?;
        let live = accumulator.clone();
        let callback: ChangeCallback = Arc::new(move |event: ChangeEvent| {
            if event.kind.is_ingestible() && filter.is_eligible(&event.path) {
                debug!("Live {:?} event for {}", event.kind, event.path.display());
                live.add(event.path);
            }
        });

        if let Err(e) = self
            .detector
            .subscribe(&self.config.reconciler.storage_root, callback)
        {
            reconciler.stop().await;
            accumulator.abort();
            return Err(e);
        }

        Ok(Running {
            accumulator,
            reconciler,
            ingestor,
        })
    }

    /// Unsubscribe, stop reconciling, then flush and drain pending work.
    /// Best-effort: failures are logged, never returned.
    pub async fn stop(&mut self) {
        if self.state != OrchestratorState::Running {
            debug!("Stop requested in state {:?}, nothing to do", self.state);
            return;
        }
        self.state = OrchestratorState::Stopping;

        if let Some(running) = self.running.take() {
            if let Err(e) = self.detector.unsubscribe() {
                warn!("Failed to unsubscribe change detector: {}", e);
            }

            if !running.reconciler.stop().await {
                warn!("Reconciler did not stop cleanly");
            }

            running.accumulator.stop();
            if !running.accumulator.drain(self.config.shutdown_timeout).await {
                warn!("Pending batches did not finish before shutdown timeout");
            }

            let totals = running.ingestor.totals();
            info!(
                "Ingestion pipeline stopped: {} batches, {} indexed, {} errors",
                totals.batches_processed, totals.files_indexed, totals.files_failed
            );
        }

        self.state = OrchestratorState::Stopped;
    }

    /// Flush the accumulator now. Returns 0 when not running.
    pub fn flush(&self) -> usize {
        self.running
            .as_ref()
            .map(|running| running.accumulator.force_flush())
            .unwrap_or(0)
    }

    /// Counters from every component; None when not running
    pub fn stats(&self) -> Option<PipelineStats> {
        self.running.as_ref().map(|running| PipelineStats {
            accumulator: running.accumulator.stats(),
            reconciler: running.reconciler.stats(),
            ingest: running.ingestor.totals(),
        })
    }
}

/// One-shot bulk reconciliation: scan, ingest everything found, drain.
///
/// Used by the `scan` command; no live events and no background loop.
pub async fn reconcile_once(
    config: &PipelineConfig,
    store: Arc<dyn FileTrackingStore>,
    sink: Arc<dyn RecordSink>,
    classifier: Arc<dyn RecordClassifier>,
) -> Result<IngestTotals> {
    config.validate()?;

    let ingestor = BatchIngestor::new(store.clone(), sink, classifier)
        .with_individual_retry(config.retry_individually);
    let accumulator =
        FileBatchAccumulator::new(config.accumulator.clone(), Arc::new(ingestor.clone()))?;
    let reconciler = Arc::new(Reconciler::new(
        config.reconciler.clone(),
        store,
        accumulator.clone(),
    )?);

    let scanner = reconciler.clone();
    let queued = tokio::task::spawn_blocking(move || scanner.reconcile())
        .await
        .map_err(|e| IngestError::Runtime(e.to_string()))??;
    info!("Queued {} files for ingest", queued);

    accumulator.force_flush();
    accumulator.stop();
    if !accumulator.drain(config.shutdown_timeout).await {
        warn!("Ingest still running at shutdown timeout");
    }

    Ok(ingestor.totals())
}
