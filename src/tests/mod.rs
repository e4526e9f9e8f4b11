// Session Ingest's Test Infrastructure
//
// Shared fakes and fixtures live in `helpers`; component tests that need a
// runtime, a database, or real files live here rather than inline.


// ============================================================================
// CORE TESTS - Storage layer
// ============================================================================
pub mod core {
    pub mod database; // Tracking table and analytical load path
}

// ============================================================================
// PIPELINE TESTS - Accumulator, reconciler, ingestor, orchestrator
// ============================================================================
pub mod integration {
    pub mod accumulator; // Dedup, size/time triggers, flush and stop semantics
    pub mod ingestor; // Grouped bulk loads and per-file failure isolation
    pub mod orchestrator; // Lifecycle, startup reconciliation, live events
    pub mod reconciler; // Filesystem-vs-store diff and background loop
}
