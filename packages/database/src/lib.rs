#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Persistent store adapters and seed loading for zone aggregates.
//!
//! With the `duckdb` feature, [`duckdb_store::DuckDbStore`] implements all
//! three engine store contracts on a single `DuckDB` file. The [`seed`]
//! module feeds JSON seed files through the offline bulk-upsert paths of
//! any store implementation.

#[cfg(feature = "duckdb")]
pub mod duckdb_store;
pub mod seed;

use std::path::{Path, PathBuf};

use zonestat_aggregates::StoreError;

/// Default location of the aggregates `DuckDB` file, under `data/shared/`
/// in the workspace root.
#[must_use]
pub fn default_db_path() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .unwrap_or(manifest_dir)
        .join("data")
        .join("shared")
        .join("aggregates.duckdb")
}

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[cfg(feature = "duckdb")]
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store contract error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Json(e) => Self::Serialization(e),
            DbError::Store(e) => e,
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_db_path_is_under_shared_data() {
        let path = default_db_path();
        assert!(path.ends_with("data/shared/aggregates.duckdb"));
        assert!(
            path.parent()
                .and_then(Path::parent)
                .and_then(Path::parent)
                .is_some_and(|root| root.join("Cargo.toml").exists())
        );
    }

    #[test]
    fn json_errors_map_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            StoreError::from(DbError::Json(err)),
            StoreError::Serialization(_)
        ));
    }
}
