//! Deduplicating path accumulator with size- and time-triggered flushes

use super::types::{AccumulatorConfig, AccumulatorStats, Batch};
use super::BatchSink;
use crate::error::{IngestError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collects paths from concurrent producers and hands them off in batches.
///
/// Cloning is cheap and every clone feeds the same pending set.
#[derive(Clone)]
pub struct FileBatchAccumulator {
    inner: Arc<Inner>,
}

struct Inner {
    config: AccumulatorConfig,
    state: Mutex<PendingState>,
    sink: Arc<dyn BatchSink>,
    runtime: Handle,
    in_flight: Arc<Semaphore>,
    // Flush callbacks dispatched but not yet finished
    outstanding: Arc<watch::Sender<usize>>,
}

#[derive(Default)]
struct PendingState {
    pending: HashSet<PathBuf>,
    timer: Option<ScheduledFlush>,
    // Bumped on every flush so a timer that already fired can tell it was cancelled
    generation: u64,
    stopped: bool,
    batches_sent: u64,
    files_sent: u64,
}

struct ScheduledFlush {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Decrements the outstanding-callback count even if the sink panics
struct OutstandingGuard(Arc<watch::Sender<usize>>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl FileBatchAccumulator {
    /// Create an accumulator bound to the current tokio runtime
    pub fn new(config: AccumulatorConfig, sink: Arc<dyn BatchSink>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| IngestError::Runtime(e.to_string()))?;
        Self::with_runtime(config, sink, runtime)
    }

    /// Create an accumulator that schedules timers and callbacks on `runtime`
    pub fn with_runtime(
        config: AccumulatorConfig,
        sink: Arc<dyn BatchSink>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let (outstanding, _) = watch::channel(0usize);

        Ok(Self {
            inner: Arc::new(Inner {
                in_flight: Arc::new(Semaphore::new(config.max_in_flight_flushes)),
                config,
                state: Mutex::new(PendingState::default()),
                sink,
                runtime,
                outstanding: Arc::new(outstanding),
            }),
        })
    }

    /// Add one path. Safe from any thread; ignored after `stop()`.
    pub fn add(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let batch = {
            let mut state = self.inner.lock_state();
            if state.stopped {
                debug!("Accumulator stopped, ignoring {}", path.display());
                return;
            }

            state.pending.insert(path);
            let batch = if state.pending.len() >= self.inner.config.max_batch_size
                && self.inner.has_capacity()
            {
                Some(self.inner.take_chunk(&mut state))
            } else {
                None
            };
            if !state.pending.is_empty() {
                self.inner.schedule_timer(&mut state);
            }
            batch
        };

        if let Some(batch) = batch {
            self.inner.dispatch(batch);
        }
    }

    /// Add many paths, flushing every time the pending set reaches the batch
    /// size. Returns the number of batches flushed synchronously.
    pub fn add_many<I>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let batches = {
            let mut state = self.inner.lock_state();
            if state.stopped {
                debug!("Accumulator stopped, ignoring bulk add");
                return 0;
            }

            let mut batches = Vec::new();
            for path in paths {
                state.pending.insert(path);
                if state.pending.len() >= self.inner.config.max_batch_size
                    && self.inner.has_capacity()
                {
                    batches.push(self.inner.take_chunk(&mut state));
                }
            }
            if !state.pending.is_empty() {
                self.inner.schedule_timer(&mut state);
            }
            batches
        };

        let flushed = batches.len();
        for batch in batches {
            self.inner.dispatch(batch);
        }
        flushed
    }

    /// Flush everything pending now, cancelling any scheduled timer.
    /// Ignores the dispatch bound. Returns the number of paths flushed.
    pub fn force_flush(&self) -> usize {
        let batches = {
            let mut state = self.inner.lock_state();
            let mut batches = Vec::new();
            while !state.pending.is_empty() {
                batches.push(self.inner.take_chunk(&mut state));
            }
            Inner::cancel_timer(&mut state);
            batches
        };

        let mut count = 0;
        for batch in batches {
            count += batch.len();
            self.inner.dispatch(batch);
        }
        count
    }

    /// Enter the terminal state. Pending paths are flushed if `flush_on_stop`
    /// is set and discarded otherwise.
    pub fn stop(&self) {
        {
            let mut state = self.inner.lock_state();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }

        if self.inner.config.flush_on_stop {
            let flushed = self.force_flush();
            info!("Accumulator stopped, flushed {} pending files", flushed);
        } else {
            let dropped = self.abort();
            info!("Accumulator stopped, discarded {} pending files", dropped);
        }
    }

    /// Enter the terminal state and discard pending paths without flushing.
    /// Returns the number discarded.
    pub fn abort(&self) -> usize {
        let mut state = self.inner.lock_state();
        state.stopped = true;
        Inner::cancel_timer(&mut state);
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    /// Wait for dispatched flush callbacks to finish, up to `timeout`.
    /// Returns false if callbacks were still running when the timeout expired.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut outstanding = self.inner.outstanding.subscribe();
        let finished = tokio::time::timeout(timeout, outstanding.wait_for(|n| *n == 0))
            .await
            .is_ok();

        if !finished {
            warn!(
                "{} ({} flush callbacks still running)",
                IngestError::ShutdownTimeout(timeout),
                *outstanding.borrow()
            );
        }
        finished
    }

    pub fn stats(&self) -> AccumulatorStats {
        let state = self.inner.lock_state();
        AccumulatorStats {
            batches_sent: state.batches_sent,
            files_sent: state.files_sent,
            pending_count: state.pending.len(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock_state().stopped
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, PendingState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Accumulator mutex poisoned, recovering: {}", poisoned);
                poisoned.into_inner()
            }
        }
    }

    /// Whether another batch may be dispatched without exceeding the
    /// running-plus-queued bound
    fn has_capacity(&self) -> bool {
        *self.outstanding.borrow() < self.config.max_outstanding_flushes()
    }

    /// Remove up to `max_batch_size` paths as one batch and count it as
    /// outstanding. Must be called under the lock; the caller dispatches it.
    fn take_chunk(&self, state: &mut PendingState) -> Batch {
        Self::cancel_timer(state);
        let batch: Batch = if state.pending.len() <= self.config.max_batch_size {
            std::mem::take(&mut state.pending).into_iter().collect()
        } else {
            let chunk: Batch = state
                .pending
                .iter()
                .take(self.config.max_batch_size)
                .cloned()
                .collect();
            for path in &chunk {
                state.pending.remove(path);
            }
            chunk
        };

        if !batch.is_empty() {
            state.batches_sent += 1;
            state.files_sent += batch.len() as u64;
            self.outstanding.send_modify(|n| *n += 1);
        }
        batch
    }

    fn cancel_timer(state: &mut PendingState) {
        state.generation = state.generation.wrapping_add(1);
        if let Some(timer) = state.timer.take() {
            timer.handle.abort();
        }
    }

    /// Schedule the one-shot window flush unless one is already pending
    fn schedule_timer(self: &Arc<Self>, state: &mut PendingState) {
        if state.timer.is_some() {
            return;
        }

        let generation = state.generation;
        let window = self.config.window_duration;
        let weak: Weak<Inner> = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_window_expired(generation);
            }
        });

        state.timer = Some(ScheduledFlush { generation, handle });
    }

    fn on_window_expired(self: &Arc<Self>, generation: u64) {
        let batches = {
            let mut state = self.lock_state();
            let current = state.timer.as_ref().map(|timer| timer.generation);
            if current != Some(generation) {
                // Flushed (and the timer cancelled) while we were waking up
                return;
            }
            // Our own handle: drop it instead of aborting the running task
            state.timer = None;

            let mut batches = Vec::new();
            while !state.pending.is_empty() && self.has_capacity() {
                batches.push(self.take_chunk(&mut state));
            }
            if !state.pending.is_empty() {
                debug!(
                    "Sink saturated, deferring {} files by another window",
                    state.pending.len()
                );
                self.schedule_timer(&mut state);
            }
            batches
        };

        for batch in batches {
            debug!("Window expired, flushing {} files", batch.len());
            self.dispatch(batch);
        }
    }

    /// Hand `batch` to the sink on its own task. Never called under the lock.
    fn dispatch(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }

        // Counted as outstanding by take_chunk
        let guard = OutstandingGuard(self.outstanding.clone());
        let sink = self.sink.clone();
        let permits = self.in_flight.clone();

        self.runtime.spawn(async move {
            let _guard = guard;
            match permits.acquire_owned().await {
                Ok(_permit) => sink.handle_batch(batch).await,
                Err(e) => warn!("Dropping batch of {} files: {}", batch.len(), e),
            }
        });
    }
}
