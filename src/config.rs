//! Persistent configuration
//!
//! Stored as TOML in the platform config directory
//! (`~/.config/dirscan/config.toml` on Linux). Every field has a default, so
//! a missing file or a partial file is fine.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metadata::DEFAULT_MAX_ENRICHABLE_PATH_LEN;
use crate::work_queue::DEFAULT_FLUSH_INTERVAL;

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub queues: QueueConfig,
    pub scan: ScanConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backlog before the crawler waits on the live view.
    pub ui_capacity: usize,
    /// Backlog before the crawler waits on the report writer.
    pub report_capacity: usize,
    /// Longest a consumer idles before draining what is pending.
    pub flush_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ui_capacity: 1,
            report_capacity: 1000,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
        }
    }
}

impl QueueConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Collect timestamps, attributes, owner and permissions per node.
    pub enrich_metadata: bool,
    /// Paths longer than this skip owner and permission lookups.
    pub max_enrichable_path_len: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enrich_metadata: true,
            max_enrichable_path_len: DEFAULT_MAX_ENRICHABLE_PATH_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory for generated reports; the working directory when unset.
    pub output_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            file_prefix: "dir_".to_string(),
        }
    }
}

impl ReportConfig {
    /// `<output_dir>/<prefix><YYYYmmdd_HHMMSS>.xml`
    pub fn report_path(&self, now: DateTime<Local>) -> PathBuf {
        let name = format!("{}{}.xml", self.file_prefix, now.format("%Y%m%d_%H%M%S"));
        match &self.output_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Config {
    /// Load from the default location. Falls back to defaults (with a
    /// warning) when the file is unreadable or malformed.
    pub fn load() -> Self {
        let path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "no config directory, using defaults");
                return Self::default();
            }
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!(error = %format!("{:#}", e), "ignoring config file");
            Self::default()
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write to the default location, creating the directory if needed.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "dirscan")
            .context("Could not determine the user's config directory")?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Command-line values win over the file.
    pub fn apply_cli_overrides(
        &mut self,
        ui_capacity: Option<usize>,
        report_capacity: Option<usize>,
        no_metadata: bool,
    ) {
        if let Some(capacity) = ui_capacity {
            self.queues.ui_capacity = capacity;
        }
        if let Some(capacity) = report_capacity {
            self.queues.report_capacity = capacity;
        }
        if no_metadata {
            self.scan.enrich_metadata = false;
        }
    }
}
