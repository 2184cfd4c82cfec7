//! Store contracts consumed by the engine.
//!
//! The engine is stateless apart from these three collaborators. Upserts
//! must be idempotent (last write wins on identical keys): concurrent
//! requests for the same key may both miss the cache and both persist.

use async_trait::async_trait;
use zonestat_aggregates_models::{
    GeoAggregateValue, GeoValuesQuery, ZoneAggregateKey, ZoneAggregateRecord, ZoneGeoWeight,
    ZoneGeoWeightRecord,
};

use crate::StoreError;

/// Persists computed zone-level results.
#[async_trait]
pub trait ZoneAggregateStore: Send + Sync {
    /// Returns the cached record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_aggregate(
        &self,
        key: &ZoneAggregateKey,
    ) -> Result<Option<ZoneAggregateRecord>, StoreError>;

    /// Inserts or replaces the record under its key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_aggregate(&self, record: &ZoneAggregateRecord) -> Result<(), StoreError>;
}

/// Persists raw geo-level input values.
#[async_trait]
pub trait GeoAggregateStore: Send + Sync {
    /// Returns the values for the queried geo codes. Codes without data are
    /// simply absent from the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_geo_values(
        &self,
        query: &GeoValuesQuery,
    ) -> Result<Vec<GeoAggregateValue>, StoreError>;

    /// Returns the newest period year with any value for the aggregate and
    /// parameter family.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_latest_period_year(
        &self,
        aggregate_id: &str,
        params_family_hash: &str,
    ) -> Result<Option<i32>, StoreError>;

    /// Bulk upsert used by offline importers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_geo_values_batch(&self, records: &[GeoAggregateValue])
    -> Result<(), StoreError>;
}

/// Resolves how zones are composed of geo codes.
#[async_trait]
pub trait ZoneGeoMapStore: Send + Sync {
    /// Returns the zone's weights, restricted to `geo_level` when given.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_zone_geo_weights(
        &self,
        zone_id: &str,
        geo_level: Option<&str>,
    ) -> Result<Vec<ZoneGeoWeight>, StoreError>;

    /// Bulk upsert used by offline importers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn upsert_zone_geo_weights_batch(
        &self,
        records: &[ZoneGeoWeightRecord],
    ) -> Result<(), StoreError>;
}
