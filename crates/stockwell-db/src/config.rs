//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKWELL_DB_PATH=/var/lib/stockwell/stock.db                      │
//! │     STOCKWELL_RESTOCK_POLICY=returns_batch                             │
//! │     STOCKWELL_RETURNS_LOT=RET                                          │
//! │     STOCKWELL_LOG=debug                                                │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockwell/stockwell.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stockwell.clinic/stockwell.toml  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "stockwell.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [stock]
//! restock_policy = "original_batch"   # original_batch | returns_batch
//! returns_lot_code = "RETURNS"
//!
//! [logging]
//! filter = "info,stockwell=debug,sqlx=warn"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use stockwell_core::refund::RestockPolicy;
use stockwell_core::validation::validate_lot_code;
use stockwell_core::DEFAULT_RETURNS_LOT_CODE;

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;
use crate::telemetry::DEFAULT_LOG_FILTER;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path, or ":memory:".
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Pool acquire timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Write-lock wait (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockwell.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// `[stock]` section: how refunds restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    #[serde(default)]
    pub restock_policy: RestockPolicy,

    /// Lot code of the per-product returns batch.
    #[serde(default = "default_returns_lot")]
    pub returns_lot_code: String,
}

fn default_returns_lot() -> String {
    DEFAULT_RETURNS_LOT_CODE.to_string()
}

impl Default for StockSettings {
    fn default() -> Self {
        StockSettings {
            restock_policy: RestockPolicy::default(),
            returns_lot_code: default_returns_lot(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// StockwellConfig
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockwellConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub stock: StockSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl StockwellConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`stockwell.toml`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml(contents: &str) -> DbResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(DbError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(DbError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::InvalidConfig(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        validate_lot_code(&self.stock.returns_lot_code)
            .map_err(|e| DbError::InvalidConfig(format!("stock.returns_lot_code: {e}")))?;

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCKWELL_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(policy) = std::env::var("STOCKWELL_RESTOCK_POLICY") {
            match policy.parse() {
                Ok(parsed) => {
                    debug!(policy = %policy, "Overriding restock policy from environment");
                    self.stock.restock_policy = parsed;
                }
                Err(e) => warn!(policy = %policy, error = %e, "Ignoring unknown restock policy"),
            }
        }

        if let Ok(lot) = std::env::var("STOCKWELL_RETURNS_LOT") {
            self.stock.returns_lot_code = lot;
        }

        if let Ok(filter) = std::env::var("STOCKWELL_LOG") {
            self.logging.filter = filter;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockwell", "clinic")
            .map(|dirs| dirs.config_dir().join("stockwell.toml"))
    }

    /// Pool settings for [`crate::Database::new`].
    pub fn to_db_config(&self) -> DbConfig {
        let db = &self.database;
        if db.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory().busy_timeout(Duration::from_millis(db.busy_timeout_ms));
        }

        DbConfig::new(db.path.clone())
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .connect_timeout(Duration::from_secs(db.connect_timeout_secs))
            .busy_timeout(Duration::from_millis(db.busy_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StockwellConfig::default();
        assert_eq!(config.stock.restock_policy, RestockPolicy::OriginalBatch);
        assert_eq!(config.stock.returns_lot_code, "RETURNS");
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StockwellConfig::from_toml(
            r#"
            [database]
            path = "/srv/clinic/stock.db"
            max_connections = 8

            [stock]
            restock_policy = "returns_batch"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/srv/clinic/stock.db"));
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database.min_connections, 1);
        assert_eq!(config.stock.restock_policy, RestockPolicy::ReturnsBatch);
        assert_eq!(config.stock.returns_lot_code, "RETURNS");

        let db = config.to_db_config();
        assert_eq!(db.max_connections, 8);
        assert_eq!(db.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = StockwellConfig::from_toml("[stock]\nrestock_policy = \"nowhere\"").unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(_)));
    }

    #[test]
    fn test_validation_rejects_bad_pool_and_lot() {
        let mut config = StockwellConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = StockwellConfig::default();
        config.database.min_connections = 9;
        assert!(config.validate().is_err());

        let mut config = StockwellConfig::default();
        config.stock.returns_lot_code = String::new();
        assert!(config.validate().is_err());
    }
}
