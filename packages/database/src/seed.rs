//! JSON seed files for the geo and zone-weight stores.
//!
//! A seed file carries raw geo values and zone weights in the same shapes
//! the offline importers write. Parameters are narrowed through the target
//! plugin's schema and hashed exactly as the service will hash a request,
//! so seeded rows are found by ordinary lookups.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zonestat_aggregates::hash::{hash_aggregate_params, hash_params_family};
use zonestat_aggregates::registry::AggregateRegistry;
use zonestat_aggregates::store::{GeoAggregateStore, ZoneGeoMapStore};
use zonestat_aggregates_models::{
    GeoAggregateValue, PERIOD_YEAR_ALIAS_FIELD, PERIOD_YEAR_FIELD, ParamsBag, ZoneGeoWeightRecord,
};

use crate::DbError;

/// Top-level seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    /// Raw geo values.
    #[serde(default)]
    pub geo_values: Vec<SeedGeoValue>,
    /// Zone-to-geo-code weights.
    #[serde(default)]
    pub zone_geo_weights: Vec<ZoneGeoWeightRecord>,
}

/// A geo value before parameter resolution and hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedGeoValue {
    /// Aggregate the value feeds.
    pub aggregate_id: String,
    /// Period the value describes.
    pub period_year: i32,
    /// Geo level of `geo_code`.
    pub geo_level: String,
    /// Geo code identifier.
    pub geo_code: String,
    /// Raw parameters, narrowed through the plugin schema before hashing.
    /// Any `periodYear`/`year` entry is replaced by `period_year`.
    #[serde(default)]
    pub params: ParamsBag,
    /// Upstream data source name.
    pub source: String,
    /// Upstream data source version.
    #[serde(default)]
    pub source_version: String,
    /// Plugin payload, checked against the plugin output schema.
    pub payload: Value,
}

/// Counts of rows written by [`apply_seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Geo values upserted.
    pub geo_values: usize,
    /// Zone geo weights upserted.
    pub zone_geo_weights: usize,
}

/// Reads and parses a seed file.
///
/// # Errors
///
/// Returns [`DbError`] if the file cannot be read or is not valid seed JSON.
pub fn load_seed_file(path: &Path) -> Result<SeedFile, DbError> {
    log::info!("Loading seed file {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Resolves one seed value into a storable [`GeoAggregateValue`].
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the aggregate is not registered or the
/// parameters or payload fail the plugin's schemas, and [`DbError::Json`]
/// if the parameters cannot be canonicalized.
pub fn resolve_geo_value(
    registry: &AggregateRegistry,
    seed: SeedGeoValue,
) -> Result<GeoAggregateValue, DbError> {
    let plugin = registry
        .get(&seed.aggregate_id)
        .ok_or_else(|| DbError::Conversion {
            message: format!("unknown aggregate '{}'", seed.aggregate_id),
        })?;

    let mut rest = seed.params;
    rest.remove(PERIOD_YEAR_FIELD);
    rest.remove(PERIOD_YEAR_ALIAS_FIELD);

    let mut params = match plugin.params_schema().parse(Value::Object(rest)) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(DbError::Conversion {
                message: format!("{} params resolved to a non-object: {other}", plugin.id()),
            });
        }
        Err(e) => {
            return Err(DbError::Conversion {
                message: format!(
                    "invalid params for {} at {}: {e}",
                    plugin.id(),
                    seed.geo_code
                ),
            });
        }
    };
    params.insert(
        PERIOD_YEAR_FIELD.to_string(),
        Value::from(seed.period_year),
    );

    plugin
        .output_schema()
        .parse(seed.payload.clone())
        .map_err(|e| DbError::Conversion {
            message: format!(
                "invalid payload for {} at {}: {e}",
                plugin.id(),
                seed.geo_code
            ),
        })?;

    Ok(GeoAggregateValue {
        aggregate_id: seed.aggregate_id,
        period_year: seed.period_year,
        geo_level: seed.geo_level,
        geo_code: seed.geo_code,
        params_hash: hash_aggregate_params(&params)?,
        params_family_hash: hash_params_family(&params)?,
        source: seed.source,
        source_version: seed.source_version,
        payload: seed.payload,
    })
}

/// Writes a seed file through the bulk upsert paths of the given stores.
///
/// Every geo value is resolved before anything is written, so a bad row
/// leaves the stores untouched.
///
/// # Errors
///
/// Returns [`DbError`] if a row fails resolution or a store write fails.
pub async fn apply_seed(
    seed: SeedFile,
    registry: &AggregateRegistry,
    geo_store: &dyn GeoAggregateStore,
    zone_geo_map_store: &dyn ZoneGeoMapStore,
) -> Result<SeedSummary, DbError> {
    let geo_values = seed
        .geo_values
        .into_iter()
        .map(|value| resolve_geo_value(registry, value))
        .collect::<Result<Vec<_>, _>>()?;

    geo_store.upsert_geo_values_batch(&geo_values).await?;
    zone_geo_map_store
        .upsert_zone_geo_weights_batch(&seed.zone_geo_weights)
        .await?;

    let summary = SeedSummary {
        geo_values: geo_values.len(),
        zone_geo_weights: seed.zone_geo_weights.len(),
    };
    log::info!(
        "Seeded {} geo values and {} zone geo weights",
        summary.geo_values,
        summary.zone_geo_weights
    );
    Ok(summary)
}
