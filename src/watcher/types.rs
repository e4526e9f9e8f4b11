//! Type definitions for change detector notifications

use std::path::PathBuf;
use std::sync::Arc;

/// Types of file system changes the detector reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    /// Removals are never ingested; the tracking table keeps its rows
    pub fn is_ingestible(&self) -> bool {
        matches!(self, ChangeKind::Created | ChangeKind::Modified)
    }
}

/// An `(eventType, path)` notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Invoked on the detector's delivery thread for every event
pub type ChangeCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
