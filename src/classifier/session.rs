//! Classifier for agent session transcripts (JSONL) and session metadata (JSON)

use super::{ParsedRecord, RecordClassifier, SessionEntry};
use crate::error::{IngestError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maps a glob pattern, relative to the storage root, to a record type.
/// The first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub pattern: String,
    pub record_type: String,
}

impl ClassifierRule {
    pub fn new(pattern: &str, record_type: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            record_type: record_type.to_string(),
        }
    }
}

/// Build the default rule set for agent session storage
pub fn default_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule::new("**/*.jsonl", "session_log"),
        ClassifierRule::new("**/*.json", "session_meta"),
    ]
}

pub struct SessionFileClassifier {
    root: PathBuf,
    rules: Vec<ClassifierRule>,
    matcher: GlobSet,
}

impl SessionFileClassifier {
    /// Rules are matched against paths relative to `root`, the same way the
    /// eligibility filter matches include patterns
    pub fn new(root: impl Into<PathBuf>, rules: Vec<ClassifierRule>) -> Result<Self> {
        let matcher = build_matcher(&rules)?;
        Ok(Self {
            root: root.into(),
            rules,
            matcher,
        })
    }

    pub fn with_default_rules(root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(root, default_rules())
    }

    /// Record type for `path` without reading the file
    pub fn record_type_for(&self, path: &Path) -> Option<&str> {
        let relative = path.strip_prefix(&self.root).ok()?;
        self.matcher
            .matches(relative)
            .into_iter()
            .min()
            .map(|idx| self.rules[idx].record_type.as_str())
    }
}

fn build_matcher(rules: &[ClassifierRule]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for rule in rules {
        let glob = Glob::new(&rule.pattern).map_err(|e| {
            IngestError::Configuration(format!(
                "Invalid classifier pattern {}: {}",
                rule.pattern, e
            ))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IngestError::Configuration(format!("Invalid classifier rules: {}", e)))
}

impl RecordClassifier for SessionFileClassifier {
    fn classify(&self, path: &Path) -> Result<ParsedRecord> {
        let record_type = self
            .record_type_for(path)
            .ok_or_else(|| IngestError::malformed(path, "no record type matches this path"))?
            .to_string();

        let content = std::fs::read_to_string(path)?;

        let is_jsonl = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

        let entries = if is_jsonl {
            parse_jsonl(path, &content)?
        } else {
            parse_json(path, &content)?
        };

        let session_id = entries
            .iter()
            .find_map(|entry| session_id_of(&entry.body))
            .or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });

        debug!(
            "Classified {} as {} ({} entries)",
            path.display(),
            record_type,
            entries.len()
        );

        Ok(ParsedRecord {
            path: path.to_path_buf(),
            record_type,
            session_id,
            entries,
        })
    }
}

fn parse_jsonl(path: &Path, content: &str) -> Result<Vec<SessionEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let body: Value = serde_json::from_str(trimmed)
            .map_err(|e| IngestError::malformed(path, format!("line {}: {}", idx + 1, e)))?;
        entries.push(to_entry(idx + 1, body));
    }
    Ok(entries)
}

fn parse_json(path: &Path, content: &str) -> Result<Vec<SessionEntry>> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| IngestError::malformed(path, e.to_string()))?;

    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, body)| to_entry(idx + 1, body))
            .collect(),
        other => vec![to_entry(1, other)],
    })
}

fn to_entry(line: usize, body: Value) -> SessionEntry {
    let entry_type = string_field(&body, &["type", "event"]);
    let timestamp = string_field(&body, &["timestamp", "ts", "time"]);
    SessionEntry {
        line,
        entry_type,
        timestamp,
        body,
    }
}

fn session_id_of(body: &Value) -> Option<String> {
    string_field(body, &["sessionId", "session_id"])
}

fn string_field(body: &Value, keys: &[&str]) -> Option<String> {
    let object = body.as_object()?;
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
