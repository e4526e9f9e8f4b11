//! File filtering logic shared by the watcher and the reconciler
//!
//! A path is eligible when it sits under the storage root, no component of
//! its root-relative path is hidden, and it matches an include pattern.

use crate::error::{IngestError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    root: PathBuf,
    matcher: GlobSet,
}

impl EligibilityFilter {
    pub fn new(root: impl Into<PathBuf>, include_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in include_patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                IngestError::Configuration(format!("Invalid glob pattern {}: {}", pattern, e))
            })?;
            builder.add(glob);
        }
        let matcher = builder
            .build()
            .map_err(|e| IngestError::Configuration(format!("Invalid include patterns: {}", e)))?;

        Ok(Self {
            root: root.into(),
            matcher,
        })
    }

    /// True if any component below the root starts with '.'
    pub fn is_hidden(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative.components().any(|component| match component {
            Component::Normal(name) => name.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }

    /// Whether `path` should be ingested. Does not touch the filesystem.
    pub fn is_eligible(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() || self.is_hidden(path) {
            return false;
        }
        self.matcher.is_match(relative)
    }
}
