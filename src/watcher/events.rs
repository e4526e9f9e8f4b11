//! Conversion of notify events into change events

use super::types::{ChangeEvent, ChangeKind};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::Event;
use tracing::debug;

/// Map one notify event to zero or more change events
pub fn to_change_events(event: Event) -> Vec<ChangeEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Created,
        // The destination of a rename is new content at that path
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeKind::Removed,
        EventKind::Modify(_) => ChangeKind::Modified,
        EventKind::Remove(_) => ChangeKind::Removed,
        other => {
            debug!("Ignoring event kind: {:?}", other);
            return Vec::new();
        }
    };

    event
        .paths
        .into_iter()
        .map(|path| ChangeEvent { kind, path })
        .collect()
}
