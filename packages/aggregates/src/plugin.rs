//! The aggregate plugin contract.

use async_trait::async_trait;
use zonestat_aggregates_models::{
    AggregateBase, AggregateDisplay, AggregateResult, GeoValuesQuery, ParamsBag, ZoneGeoWeight,
};

use crate::ZoneAggregateError;
use crate::schema::Schema;
use crate::store::GeoAggregateStore;

/// Everything a plugin needs to compute one zone result.
pub struct ComputeContext<'a> {
    /// Zone being computed.
    pub zone_id: &'a str,
    /// Aggregate being computed.
    pub aggregate_id: &'a str,
    /// Resolved period year.
    pub period_year: i32,
    /// Validated, fully-resolved parameters (including `periodYear`).
    pub params: &'a ParamsBag,
    /// Hash of `params`.
    pub params_hash: &'a str,
    /// The zone's geo-code weights.
    pub zone_geo_weights: &'a [ZoneGeoWeight],
    /// Source of raw geo-level values.
    pub geo_store: &'a dyn GeoAggregateStore,
    /// `log` target for plugin diagnostics.
    pub log_target: &'a str,
}

impl ComputeContext<'_> {
    /// Builds the geo value query for `geo_codes` at `geo_level`, scoped to
    /// this request's aggregate, period, and parameters.
    #[must_use]
    pub fn geo_values_query(&self, geo_level: &str, geo_codes: Vec<String>) -> GeoValuesQuery {
        GeoValuesQuery {
            aggregate_id: self.aggregate_id.to_string(),
            period_year: self.period_year,
            geo_level: geo_level.to_string(),
            geo_codes,
            params_hash: self.params_hash.to_string(),
        }
    }

    /// Builds a result for this request, stamped with the current time.
    #[must_use]
    pub fn result(
        &self,
        coverage: f64,
        source: String,
        source_version: String,
        payload: serde_json::Value,
    ) -> AggregateResult {
        AggregateResult {
            base: AggregateBase {
                zone_id: self.zone_id.to_string(),
                aggregate_id: self.aggregate_id.to_string(),
                period_year: self.period_year,
                params_hash: self.params_hash.to_string(),
                coverage,
                source,
                source_version,
                computed_at: chrono::Utc::now(),
            },
            payload,
        }
    }

    /// Creates a [`ZoneAggregateError::NoData`] for this request.
    pub fn no_data(&self, message: impl Into<String>) -> ZoneAggregateError {
        ZoneAggregateError::no_data(self.aggregate_id, message)
    }
}

/// A self-contained aggregate computation.
///
/// Plugins are validated once when registered; a new computation shape
/// needs a new id or version bump rather than a silent redefinition.
#[async_trait]
pub trait AggregatePlugin: Send + Sync {
    /// Stable identifier, e.g. `"rent.v1"`.
    fn id(&self) -> &str;

    /// Human-facing metadata.
    fn display(&self) -> &AggregateDisplay;

    /// Schema of the request parameters, excluding `periodYear` which the
    /// service resolves itself.
    fn params_schema(&self) -> &dyn Schema;

    /// Schema of each geo-level input payload.
    fn output_schema(&self) -> &dyn Schema;

    /// Geo level to request zone weights at, if the plugin has one.
    fn preferred_geo_level(&self) -> Option<&str> {
        None
    }

    /// Computes the zone result.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneAggregateError::NoData`] when nothing covers the zone,
    /// or any store error encountered while reading geo values.
    async fn compute(&self, ctx: &ComputeContext<'_>)
    -> Result<AggregateResult, ZoneAggregateError>;
}
