// FileBatchAccumulator behaviour: dedup, size and time triggers, stop semantics

use crate::pipeline::{AccumulatorConfig, Batch, BatchSink, FileBatchAccumulator};
use crate::tests::helpers::CollectingSink;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

fn config(window_ms: u64, max_batch_size: usize) -> AccumulatorConfig {
    AccumulatorConfig {
        window_duration: Duration::from_millis(window_ms),
        max_batch_size,
        flush_on_stop: true,
        max_in_flight_flushes: 4,
        max_queued_flushes: 16,
    }
}

fn paths(prefix: &str, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| PathBuf::from(format!("/sessions/{}-{}.jsonl", prefix, i)))
        .collect()
}

fn as_set(batch: &Batch) -> HashSet<PathBuf> {
    batch.iter().cloned().collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_window_flushes_deduplicated_batch() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(200, 100), sink.clone()).unwrap();

    accumulator.add("/sessions/a.jsonl");
    accumulator.add("/sessions/b.jsonl");
    accumulator.add("/sessions/a.jsonl");
    accumulator.add("/sessions/c.jsonl");
    assert!(sink.batches().is_empty(), "nothing flushes before the window");

    let batches = sink.wait_for_batches(1, Duration::from_secs(2)).await;
    assert_eq!(batches.len(), 1);
    let expected: HashSet<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|name| PathBuf::from(format!("/sessions/{}.jsonl", name)))
        .collect();
    assert_eq!(as_set(&batches[0]), expected);

    let stats = accumulator.stats();
    assert_eq!(stats.batches_sent, 1);
    assert_eq!(stats.files_sent, 3);
    assert_eq!(stats.pending_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_window_is_not_extended_by_later_adds() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(150, 1000), sink.clone()).unwrap();

    accumulator.add("/sessions/first.jsonl");
    tokio::time::sleep(Duration::from_millis(100)).await;
    accumulator.add("/sessions/second.jsonl");

    // One window from the first add, not from the last
    let batches = sink.wait_for_batches(1, Duration::from_millis(120)).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_time_trigger_below_batch_size() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(100, 100), sink.clone()).unwrap();

    for path in paths("t", 50) {
        accumulator.add(path);
    }

    let batches = sink.wait_for_batches(1, Duration::from_secs(2)).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_size_trigger_flushes_synchronously() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(10_000, 100), sink.clone()).unwrap();

    let flushed = accumulator.add_many(paths("s", 150));
    assert_eq!(flushed, 1);

    let stats = accumulator.stats();
    assert_eq!(stats.batches_sent, 1);
    assert_eq!(stats.files_sent, 100);
    assert_eq!(stats.pending_count, 50);

    let batches = sink.wait_for_batches(1, Duration::from_secs(2)).await;
    assert_eq!(batches[0].len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backlog_larger_than_two_batches() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(10_000, 100), sink.clone()).unwrap();

    assert_eq!(accumulator.add_many(paths("bulk", 250)), 2);
    assert_eq!(accumulator.stats().pending_count, 50);

    let batches = sink.wait_for_batches(2, Duration::from_secs(2)).await;
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|batch| batch.len() == 100));
    assert_eq!(accumulator.stats().pending_count, 50);

    // No path shows up in two batches
    let mut seen = HashSet::new();
    for batch in &batches {
        for path in batch {
            assert!(seen.insert(path.clone()), "{} flushed twice", path.display());
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_adds_of_same_path_are_deduplicated() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(200, 1000), sink.clone()).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let accumulator = accumulator.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    accumulator.add("/sessions/hot.jsonl");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let batches = sink.wait_for_batches(1, Duration::from_secs(2)).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![PathBuf::from("/sessions/hot.jsonl")]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.batches().len(), 1, "no second flush for the same path");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_flush_cancels_timer() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(150, 100), sink.clone()).unwrap();

    accumulator.add_many(paths("f", 3));
    assert_eq!(accumulator.force_flush(), 3);
    assert_eq!(accumulator.force_flush(), 0, "empty flush is a no-op");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let batches = sink.batches();
    assert_eq!(batches.len(), 1, "cancelled timer must not flush again");
    assert_eq!(batches[0].len(), 3);
    assert_eq!(accumulator.stats().batches_sent, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_flushes_pending_and_ignores_later_adds() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(10_000, 100), sink.clone()).unwrap();

    accumulator.add_many(paths("p", 7));
    accumulator.stop();
    assert!(accumulator.is_stopped());
    assert!(accumulator.drain(Duration::from_secs(2)).await);

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 7);

    accumulator.add("/sessions/late.jsonl");
    assert_eq!(accumulator.add_many(paths("late", 200)), 0);
    accumulator.stop();
    assert_eq!(accumulator.stats().pending_count, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.total_files(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_without_flush_on_stop_discards_pending() {
    let sink = CollectingSink::new();
    let mut cfg = config(100, 100);
    cfg.flush_on_stop = false;
    let accumulator = FileBatchAccumulator::new(cfg, sink.clone()).unwrap();

    accumulator.add_many(paths("d", 5));
    accumulator.stop();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(sink.batches().is_empty());
    assert_eq!(accumulator.stats().pending_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abort_reports_discarded_count() {
    let sink = CollectingSink::new();
    let accumulator = FileBatchAccumulator::new(config(100, 100), sink.clone()).unwrap();

    accumulator.add_many(paths("x", 4));
    assert_eq!(accumulator.abort(), 4);
    assert!(accumulator.is_stopped());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(sink.batches().is_empty());
}

/// Sink that feeds a path back into the accumulator from inside the callback
struct ReentrantSink {
    accumulator: OnceLock<FileBatchAccumulator>,
    received: Mutex<Vec<Batch>>,
}

#[async_trait]
impl BatchSink for ReentrantSink {
    async fn handle_batch(&self, batch: Batch) {
        let first = {
            let mut received = self.received.lock().unwrap();
            received.push(batch);
            received.len() == 1
        };
        if first {
            if let Some(accumulator) = self.accumulator.get() {
                accumulator.add("/sessions/follow-up.jsonl");
                accumulator.force_flush();
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_callback_may_add_without_deadlock() {
    let sink = Arc::new(ReentrantSink {
        accumulator: OnceLock::new(),
        received: Mutex::new(Vec::new()),
    });
    let accumulator = FileBatchAccumulator::new(config(50, 100), sink.clone()).unwrap();
    let _ = sink.accumulator.set(accumulator.clone());

    accumulator.add("/sessions/start.jsonl");

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while sink.received.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let received = sink.received.lock().unwrap().clone();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1], vec![PathBuf::from("/sessions/follow-up.jsonl")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain_waits_for_slow_callbacks() {
    let sink = CollectingSink::with_delay(Duration::from_millis(200));
    let accumulator = FileBatchAccumulator::new(config(10_000, 100), sink.clone()).unwrap();

    accumulator.add_many(paths("slow", 10));
    accumulator.stop();
    assert!(sink.batches().is_empty(), "callback is still sleeping");

    assert!(accumulator.drain(Duration::from_secs(2)).await);
    assert_eq!(sink.total_files(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drain_times_out_on_stalled_callback() {
    let sink = CollectingSink::with_delay(Duration::from_secs(5));
    let accumulator = FileBatchAccumulator::new(config(10_000, 100), sink.clone()).unwrap();

    accumulator.add("/sessions/stuck.jsonl");
    accumulator.stop();

    let started = std::time::Instant::now();
    assert!(!accumulator.drain(Duration::from_millis(100)).await);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_in_flight_flushes_are_bounded() {
    let sink = CollectingSink::with_delay(Duration::from_millis(100));
    let mut cfg = config(10_000, 1);
    cfg.max_in_flight_flushes = 2;
    let accumulator = FileBatchAccumulator::new(cfg, sink.clone()).unwrap();

    // Batch size 1: every add flushes, none of them block
    let started = std::time::Instant::now();
    assert_eq!(accumulator.add_many(paths("b", 6)), 6);
    assert!(started.elapsed() < Duration::from_millis(100));

    assert!(accumulator.drain(Duration::from_secs(5)).await);
    assert_eq!(sink.batches().len(), 6);
    assert!(sink.max_in_flight() <= 2, "saw {}", sink.max_in_flight());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_sink_defers_flushes_instead_of_queueing() {
    let sink = CollectingSink::with_delay(Duration::from_secs(5));
    let mut cfg = config(10_000, 1);
    cfg.max_in_flight_flushes = 1;
    cfg.max_queued_flushes = 1;
    let accumulator = FileBatchAccumulator::new(cfg, sink.clone()).unwrap();

    // One batch running, one waiting; the rest stays in the pending set
    assert_eq!(accumulator.add_many(paths("stall", 10)), 2);
    accumulator.add("/sessions/another.jsonl");

    let stats = accumulator.stats();
    assert_eq!(stats.batches_sent, 2);
    assert_eq!(stats.pending_count, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deferred_paths_flush_once_sink_catches_up() {
    let sink = CollectingSink::with_delay(Duration::from_millis(50));
    let mut cfg = config(30, 2);
    cfg.max_in_flight_flushes = 1;
    cfg.max_queued_flushes = 0;
    let accumulator = FileBatchAccumulator::new(cfg, sink.clone()).unwrap();

    assert_eq!(accumulator.add_many(paths("slow", 7)), 1);

    let batches = sink.wait_for_batches(4, Duration::from_secs(3)).await;
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|batch| batch.len() <= 2));
    assert_eq!(sink.total_files(), 7);
    assert_eq!(sink.max_in_flight(), 1);
    assert_eq!(accumulator.stats().pending_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_force_flush_splits_deferred_backlog_into_batches() {
    let sink = CollectingSink::with_delay(Duration::from_millis(20));
    let mut cfg = config(10_000, 3);
    cfg.max_in_flight_flushes = 1;
    cfg.max_queued_flushes = 0;
    let accumulator = FileBatchAccumulator::new(cfg, sink.clone()).unwrap();

    assert_eq!(accumulator.add_many(paths("backlog", 8)), 1);
    assert_eq!(accumulator.force_flush(), 5);
    assert!(accumulator.drain(Duration::from_secs(2)).await);

    let mut sizes: Vec<usize> = sink.batches().iter().map(|batch| batch.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 3, 3]);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let sink = CollectingSink::new();
    assert!(FileBatchAccumulator::new(config(0, 100), sink.clone()).is_err());
    assert!(FileBatchAccumulator::new(config(100, 0), sink).is_err());
}

#[test]
fn test_new_outside_runtime_is_an_error() {
    let sink = CollectingSink::new();
    assert!(FileBatchAccumulator::new(config(100, 100), sink).is_err());
}
