#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Zone aggregates engine.
//!
//! Aggregates are pluggable computations ([`plugin::AggregatePlugin`])
//! registered once at startup in an [`registry::AggregateRegistry`]. The
//! [`service::ZoneAggregatesService`] validates raw parameters through the
//! plugin's schema, resolves `"latest"` period years, content-addresses the
//! resolved parameters with the canonical [`hash`]er, and serves results
//! read-through from the injected [`store`]s.

pub mod combine;
pub mod hash;
pub mod memory;
pub mod plugin;
pub mod registry;
pub mod schema;
pub mod service;
pub mod store;

use serde_json::json;
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};

/// Stable error codes reported to callers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The aggregate id was never registered.
    UnknownAggregate,
    /// The aggregate is known but has no data for the request.
    NoData,
    /// The parameters failed the plugin's schema.
    InvalidParams,
    /// A store adapter failed.
    StoreError,
    /// The plugin failed for a reason other than missing data.
    ComputeError,
}

/// Errors raised by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("Store backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },

    /// A stored payload could not be (de)serialized.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while serving zone aggregates.
#[derive(Debug, thiserror::Error)]
pub enum ZoneAggregateError {
    /// The aggregate id is not in the registry.
    #[error("Unknown aggregate: {aggregate_id}")]
    UnknownAggregate {
        /// The requested id.
        aggregate_id: String,
    },

    /// No underlying data exists for the resolved period and parameters.
    #[error("No data for {aggregate_id}: {message}")]
    NoData {
        /// The requested id.
        aggregate_id: String,
        /// Description of what was missing.
        message: String,
    },

    /// Parameter validation error from the plugin schema.
    #[error(transparent)]
    InvalidParams(#[from] serde_json::Error),

    /// Store adapter error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Plugin computation error.
    #[error("Compute error: {message}")]
    Compute {
        /// Description of what went wrong.
        message: String,
    },
}

impl ZoneAggregateError {
    /// Creates a [`Self::NoData`] error.
    pub fn no_data(aggregate_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NoData {
            aggregate_id: aggregate_id.into(),
            message: message.into(),
        }
    }

    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownAggregate { .. } => ErrorCode::UnknownAggregate,
            Self::NoData { .. } => ErrorCode::NoData,
            Self::InvalidParams(_) => ErrorCode::InvalidParams,
            Self::Store(_) => ErrorCode::StoreError,
            Self::Compute { .. } => ErrorCode::ComputeError,
        }
    }

    /// Returns structured details for error responses.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UnknownAggregate { aggregate_id } | Self::NoData { aggregate_id, .. } => {
                Some(json!({ "aggregateId": aggregate_id }))
            }
            Self::InvalidParams(e) => Some(json!({
                "category": format!("{:?}", e.classify()).to_lowercase(),
            })),
            Self::Store(_) | Self::Compute { .. } => None,
        }
    }
}
