//! Server configuration read from environment variables.

use std::path::PathBuf;

use strum_macros::{AsRefStr, Display, EnumString};

/// Which store adapters back the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoreKind {
    /// Process-local in-memory stores. Contents are lost on restart.
    #[default]
    Memory,
    /// A `DuckDB` file shared by all three stores.
    Duckdb,
}

/// Errors in the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `ZONESTAT_STORE` holds an unknown value.
    #[error("Invalid ZONESTAT_STORE '{value}': expected memory or duckdb")]
    InvalidStore {
        /// The rejected value.
        value: String,
    },
}

/// Settings for [`crate::run_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind (`BIND_ADDR`).
    pub bind_addr: String,
    /// Port to bind (`PORT`).
    pub port: u16,
    /// Store backend (`ZONESTAT_STORE`).
    pub store: StoreKind,
    /// `DuckDB` file used when `store` is [`StoreKind::Duckdb`]
    /// (`ZONESTAT_DB_PATH`).
    pub db_path: PathBuf,
    /// Optional JSON seed file applied at startup (`ZONESTAT_SEED_PATH`).
    pub seed_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable
    /// name to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable holds an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store = match lookup("ZONESTAT_STORE") {
            Some(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidStore { value })?,
            _ => StoreKind::default(),
        };

        Ok(Self {
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            store,
            db_path: lookup("ZONESTAT_DB_PATH")
                .map_or_else(zonestat_database::default_db_path, PathBuf::from),
            seed_path: lookup("ZONESTAT_SEED_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }
}
