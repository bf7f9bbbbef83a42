//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StoreError;

/// Store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub storage: StorageConfig,
    pub writer: WriterConfig,
    pub cache: CacheConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

/// Database file placement and connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one database file per identity
    pub data_dir: PathBuf,
    /// Size of the reader connection pool used by observers
    pub read_connections: u32,
    /// How long SQLite waits on a lock held by another connection
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Write serializer settings
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    /// How long an interrupted write waits for a resume signal (default: 1000)
    pub resume_timeout_ms: u64,
}

impl WriterConfig {
    pub fn resume_timeout(&self) -> Duration {
        Duration::from_millis(self.resume_timeout_ms)
    }
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum decoded status bodies kept in memory (default: 4096)
    pub decode_max_items: u64,
}

/// Housekeeping run when a store is opened
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    /// Remove unreferenced statuses and accounts at open
    pub prune_on_open: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
                read_connections: 4,
                busy_timeout_ms: 5_000,
            },
            writer: WriterConfig {
                resume_timeout_ms: 1_000,
            },
            cache: CacheConfig {
                decode_max_items: 4_096,
            },
            maintenance: MaintenanceConfig {
                prune_on_open: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl StoreConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEEDSTORE_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, StoreError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("storage.data_dir", "data")?
            .set_default("storage.read_connections", 4)?
            .set_default("storage.busy_timeout_ms", 5000)?
            .set_default("writer.resume_timeout_ms", 1000)?
            .set_default("cache.decode_max_items", 4096)?
            .set_default("maintenance.prune_on_open", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FEEDSTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let store_config: Self = config.try_deserialize()?;
        store_config.validate()?;
        Ok(store_config)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.storage.read_connections == 0 {
            return Err(StoreError::Config(
                "storage.read_connections must be greater than 0".to_string(),
            ));
        }

        if self.writer.resume_timeout_ms == 0 {
            return Err(StoreError::Config(
                "writer.resume_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.cache.decode_max_items == 0 {
            return Err(StoreError::Config(
                "cache.decode_max_items must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(StoreError::Config(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}
