//! Session Ingest configuration
//!
//! Loaded once from an optional `ingest.toml`; every field has a default so
//! an empty (or missing) file is a valid configuration. CLI flags override
//! individual fields before `pipeline_config()` turns it into the runtime
//! form handed to the orchestrator.

use crate::classifier::{default_rules, ClassifierRule};
use crate::error::{IngestError, Result};
use crate::pipeline::{AccumulatorConfig, PipelineConfig, ReconcilerConfig};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory holding the session files to ingest
    pub storage_root: PathBuf,

    /// SQLite file for the tracking table and the analytical tables
    pub database_path: PathBuf,

    /// Rolling log directory (defaults to `logs/` next to the database)
    pub log_dir: Option<PathBuf>,

    /// Upper bound on each component's stop
    pub shutdown_timeout_ms: u64,

    pub accumulator: AccumulatorSection,
    pub reconciler: ReconcilerSection,
    pub ingest: IngestSection,
    pub classifier: ClassifierSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorSection {
    pub window_ms: u64,
    pub max_batch_size: usize,
    pub max_in_flight_flushes: usize,
    pub max_queued_flushes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub scan_interval_secs: u64,
    pub max_results: usize,
    pub include_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSection {
    pub retry_individually: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub rules: Vec<ClassifierRule>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("sessions"),
            database_path: PathBuf::from(".session-ingest/ingest.db"),
            log_dir: None,
            shutdown_timeout_ms: 5000,
            accumulator: AccumulatorSection::default(),
            reconciler: ReconcilerSection::default(),
            ingest: IngestSection::default(),
            classifier: ClassifierSection::default(),
        }
    }
}

impl Default for AccumulatorSection {
    fn default() -> Self {
        Self {
            window_ms: 500,
            max_batch_size: 100,
            max_in_flight_flushes: 4,
            max_queued_flushes: 16,
        }
    }
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            max_results: 10_000,
            include_patterns: crate::pipeline::default_include_patterns(),
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            retry_individually: true,
        }
    }
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: IngestConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                debug!("No config file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save configuration as pretty TOML
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_content =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            self.database_path
                .parent()
                .map(|parent| parent.join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }

    /// Resolve into the runtime configuration.
    ///
    /// The storage root is canonicalized so watcher and scan paths share one
    /// spelling; a root that does not exist is a configuration error.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let storage_root = self.storage_root.canonicalize().map_err(|e| {
            IngestError::Configuration(format!(
                "invalid storage root {}: {}",
                self.storage_root.display(),
                e
            ))
        })?;

        let shutdown_timeout = Duration::from_millis(self.shutdown_timeout_ms);
        let mut reconciler = ReconcilerConfig::new(
            storage_root,
            Duration::from_secs(self.reconciler.scan_interval_secs),
        );
        reconciler.max_results = self.reconciler.max_results;
        reconciler.include_patterns = self.reconciler.include_patterns.clone();
        reconciler.join_timeout = shutdown_timeout;

        let config = PipelineConfig {
            accumulator: AccumulatorConfig {
                window_duration: Duration::from_millis(self.accumulator.window_ms),
                max_batch_size: self.accumulator.max_batch_size,
                flush_on_stop: true,
                max_in_flight_flushes: self.accumulator.max_in_flight_flushes,
                max_queued_flushes: self.accumulator.max_queued_flushes,
            },
            reconciler,
            retry_individually: self.ingest.retry_individually,
            shutdown_timeout,
        };
        config.validate()?;
        Ok(config)
    }
}
