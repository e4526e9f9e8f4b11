//! Change detection for the storage root
//!
//! The pipeline only needs `(eventType, path)` notifications, and treats them
//! as a best-effort hint: dropped events are recovered by reconciliation.
//! `NotifyChangeDetector` is the production implementation on top of
//! notify-rs; it delivers on notify's own thread.

mod events;
pub mod filtering; // Public for tests
pub mod types;

use crate::error::Result;
use notify::Watcher;
use std::path::Path;
use tracing::{debug, info, warn};

pub use events::to_change_events;
pub use filtering::EligibilityFilter;
pub use types::{ChangeCallback, ChangeEvent, ChangeKind};

/// Source of live file change notifications
pub trait ChangeDetector: Send {
    /// Start delivering events under `root` to `callback`
    fn subscribe(&mut self, root: &Path, callback: ChangeCallback) -> Result<()>;

    /// Stop delivering events. Safe to call when not subscribed.
    fn unsubscribe(&mut self) -> Result<()>;
}

/// Recursive notify-rs watcher
#[derive(Default)]
pub struct NotifyChangeDetector {
    watcher: Option<notify::RecommendedWatcher>,
}

impl NotifyChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeDetector for NotifyChangeDetector {
    fn subscribe(&mut self, root: &Path, callback: ChangeCallback) -> Result<()> {
        if self.watcher.is_some() {
            warn!("Change detector already subscribed, replacing watcher");
            self.unsubscribe()?;
        }

        info!("Starting file watcher for: {}", root.display());

        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    debug!("File system event detected: {:?}", event);
                    for change in to_change_events(event) {
                        callback(change);
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            },
        )?;

        watcher.watch(root, notify::RecursiveMode::Recursive)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        if let Some(watcher) = self.watcher.take() {
            drop(watcher);
            info!("File watcher stopped");
        }
        Ok(())
    }
}
