//! Server configuration.
//!
//! One YAML document configures the process: log format, where sinks
//! write, an optional catalog override, and the list of hosted worlds.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use voxelcraft_core::WorldConfig;
use voxelcraft_core::config::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Complete server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Root directory for snapshots, audit and tick logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Catalog YAML; the built-in catalog is used when absent.
    #[serde(default)]
    pub catalogs: Option<PathBuf>,
    /// Capacity of each sink channel.
    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
    /// Resume each world from its newest snapshot on disk.
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Hosted worlds.
    #[serde(default)]
    pub worlds: Vec<WorldConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

const fn default_sink_buffer() -> usize {
    1024
}

const fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            data_dir: default_data_dir(),
            catalogs: None,
            sink_buffer: default_sink_buffer(),
            resume: true,
            worlds: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load and normalize configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and normalize configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.normalized()
    }

    /// Fill defaults and reject duplicate world ids.
    ///
    /// An empty world list hosts a single default world.
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        if self.sink_buffer == 0 {
            self.sink_buffer = default_sink_buffer();
        }
        if self.worlds.is_empty() {
            self.worlds.push(WorldConfig::default());
        }
        self.worlds = self.worlds.into_iter().map(WorldConfig::normalized).collect();
        let mut seen = BTreeSet::new();
        for w in &self.worlds {
            w.validate()?;
            if !seen.insert(w.id.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate world id {}", w.id),
                });
            }
        }
        Ok(self)
    }

    /// Directory holding one world's files.
    pub fn world_dir(&self, world_id: &str) -> PathBuf {
        self.data_dir.join(world_id)
    }
}
