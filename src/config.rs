//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - quiver.toml (default configuration)
//! - quiver.local.toml (git-ignored local overrides)
//! - Environment variables (QUIVER_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # quiver.toml
//! [execution]
//! num_threads = 8
//! timeout_ms = 60000
//!
//! [storage]
//! data_dir = "/var/lib/quiver/data"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUIVER_EXECUTION__NUM_THREADS=4
//! QUIVER_STORAGE__DATA_DIR=/custom/path
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query execution tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of worker threads (0 = all available CPU cores)
    #[serde(default)]
    pub num_threads: usize,

    /// Per-query timeout in milliseconds (0 = no timeout)
    #[serde(default)]
    pub timeout_ms: u64,

    /// Upper bound on recursive pattern depth
    #[serde(default = "default_max_recursive_depth")]
    pub max_recursive_depth: u64,

    /// Morsel granularity for table scans, in tuples
    #[serde(default = "default_morsel_size")]
    pub morsel_size: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for database files and the WAL
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Whether the WAL syncs on every append
    #[serde(default = "default_true")]
    pub wal_immediate_sync: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_max_recursive_depth() -> u64 {
    30
}
fn default_morsel_size() -> u64 {
    crate::vector::DEFAULT_VECTOR_CAPACITY as u64
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. quiver.toml (base configuration)
    /// 2. quiver.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUIVER_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("quiver.toml"))
            .merge(Toml::file("quiver.local.toml"))
            .merge(Env::prefixed("QUIVER_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUIVER_").split("__"))
            .extract()
    }

    /// Resolved worker thread count
    pub fn worker_threads(&self) -> usize {
        if self.execution.num_threads == 0 {
            num_cpus::get()
        } else {
            self.execution.num_threads
        }
    }

    /// Initialize a global tracing subscriber from the logging section.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn init_tracing(&self) {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.logging.level.clone()));
        if self.logging.format == "json" {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            num_threads: 0,
            timeout_ms: 0,
            max_recursive_depth: default_max_recursive_depth(),
            morsel_size: default_morsel_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: default_data_dir(),
            wal_immediate_sync: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.execution.num_threads, 0);
        assert_eq!(config.execution.timeout_ms, 0);
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert!(config.worker_threads() >= 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serializable");
        assert!(toml_str.contains("[execution]"));
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[logging]"));
    }
}
