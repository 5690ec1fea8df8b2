//! Daemon configuration

use serde::{Deserialize, Serialize};
use snapdiff_common::{Error, Result};
use snapdiff_compare::{ImageComparator, MaskFormat, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Diff worker configuration
    pub worker: WorkerConfig,

    /// Image comparison configuration
    pub comparator: ComparatorConfig,

    /// Diff result configuration
    pub diff: DiffConfig,

    /// Ingestion configuration
    pub ingest: IngestConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: snapdiff_common::default_store_path(),
            worker: WorkerConfig::default(),
            comparator: ComparatorConfig::default(),
            diff: DiffConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// Diff worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between two polls of the job queue
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 500 }
    }
}

/// Image comparison configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    /// Grayscale difference a pixel may have before it counts as a diff
    pub pixel_tolerance: u8,

    /// Minimum correlation score for `locate`
    pub match_threshold: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            pixel_tolerance: 0,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// Diff result configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// How diff masks are persisted on candidates
    pub mask_format: MaskFormat,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fall back to references of earlier versions when a lineage has none
    pub search_previous_versions: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            search_previous_versions: true,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "worker.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        let threshold = self.comparator.match_threshold;
        // a score must exceed the threshold, so 1.0 could never match
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "comparator.match_threshold must be in (0, 1), got {}",
                threshold
            )));
        }

        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        snapdiff_common::db_path(&self.store_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker.poll_interval_ms)
    }

    /// Comparator configured from the `[comparator]` section
    pub fn comparator(&self) -> ImageComparator {
        ImageComparator::new()
            .with_pixel_tolerance(self.comparator.pixel_tolerance)
            .with_match_threshold(self.comparator.match_threshold)
    }
}
