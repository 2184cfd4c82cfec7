//! Read-through orchestration of zone aggregate requests.
//!
//! A single request is a linear chain: look up the plugin, validate the
//! parameters, resolve the period year, hash, check the cache, and on a
//! miss load the zone weights, compute, and persist. Batches run every
//! item through the same chain independently.

use std::sync::Arc;

use futures::future::join_all;
use serde::de::Error as _;
use serde_json::Value;
use zonestat_aggregates_models::{
    AggregateRequest, AggregateResult, BatchErrorItem, BatchResponse, BatchResultItem,
    PERIOD_YEAR_ALIAS_FIELD, PERIOD_YEAR_FIELD, ParamsBag, PeriodYearInput, ZoneAggregateKey,
    ZoneAggregateRecord,
};

use crate::ZoneAggregateError;
use crate::hash::{hash_aggregate_params, hash_params_family};
use crate::plugin::{AggregatePlugin, ComputeContext};
use crate::registry::AggregateRegistry;
use crate::store::{GeoAggregateStore, ZoneAggregateStore, ZoneGeoMapStore};

/// Parameters after validation and period resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    /// Concrete period year.
    pub period_year: i32,
    /// Validated parameters including `periodYear`.
    pub params: ParamsBag,
    /// Hash of `params`.
    pub params_hash: String,
}

/// Serves zone aggregates from the registry and the injected stores.
pub struct ZoneAggregatesService {
    registry: Arc<AggregateRegistry>,
    aggregate_store: Arc<dyn ZoneAggregateStore>,
    geo_store: Arc<dyn GeoAggregateStore>,
    zone_geo_map_store: Arc<dyn ZoneGeoMapStore>,
}

impl ZoneAggregatesService {
    /// Creates a service over `registry` and the three stores.
    #[must_use]
    pub fn new(
        registry: Arc<AggregateRegistry>,
        aggregate_store: Arc<dyn ZoneAggregateStore>,
        geo_store: Arc<dyn GeoAggregateStore>,
        zone_geo_map_store: Arc<dyn ZoneGeoMapStore>,
    ) -> Self {
        Self {
            registry,
            aggregate_store,
            geo_store,
            zone_geo_map_store,
        }
    }

    /// The plugin registry.
    #[must_use]
    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    /// Returns the aggregate for a zone, computing and caching it on a miss.
    ///
    /// # Errors
    ///
    /// * [`ZoneAggregateError::UnknownAggregate`] if `aggregate_id` is not
    ///   registered
    /// * [`ZoneAggregateError::InvalidParams`] if the parameters fail the
    ///   plugin schema
    /// * [`ZoneAggregateError::NoData`] if no period or no geo data exists
    /// * any store or plugin error, unchanged
    pub async fn get_aggregate(
        &self,
        zone_id: &str,
        aggregate_id: &str,
        raw_params: &ParamsBag,
    ) -> Result<AggregateResult, ZoneAggregateError> {
        let plugin =
            self.registry
                .get(aggregate_id)
                .ok_or_else(|| ZoneAggregateError::UnknownAggregate {
                    aggregate_id: aggregate_id.to_string(),
                })?;

        let resolved = self.resolve_params(plugin, raw_params).await?;

        let key = ZoneAggregateKey {
            zone_id: zone_id.to_string(),
            aggregate_id: aggregate_id.to_string(),
            period_year: resolved.period_year,
            params_hash: resolved.params_hash.clone(),
        };

        if let Some(cached) = self.aggregate_store.get_aggregate(&key).await? {
            log::debug!(
                "Cache hit for {aggregate_id} zone={zone_id} year={} hash={}",
                key.period_year,
                key.params_hash
            );
            return Ok(cached.into());
        }

        log::debug!(
            "Cache miss for {aggregate_id} zone={zone_id} year={} hash={}",
            key.period_year,
            key.params_hash
        );

        let zone_geo_weights = self
            .zone_geo_map_store
            .get_zone_geo_weights(zone_id, plugin.preferred_geo_level())
            .await?;

        let ctx = ComputeContext {
            zone_id,
            aggregate_id,
            period_year: resolved.period_year,
            params: &resolved.params,
            params_hash: &resolved.params_hash,
            zone_geo_weights: &zone_geo_weights,
            geo_store: self.geo_store.as_ref(),
            log_target: aggregate_id,
        };

        let result = plugin.compute(&ctx).await?;

        self.aggregate_store
            .upsert_aggregate(&ZoneAggregateRecord::from(result.clone()))
            .await?;

        Ok(result)
    }

    /// Validates `raw_params` and resolves the period year.
    ///
    /// A missing `periodYear` (or alias `year`) and the `"latest"`
    /// sentinel both resolve to the newest year with geo data for the
    /// parameter family.
    ///
    /// # Errors
    ///
    /// * [`ZoneAggregateError::InvalidParams`] if the parameters fail the
    ///   plugin schema or the period year is malformed
    /// * [`ZoneAggregateError::NoData`] if `"latest"` finds no data
    pub async fn resolve_params(
        &self,
        plugin: &dyn AggregatePlugin,
        raw_params: &ParamsBag,
    ) -> Result<ResolvedParams, ZoneAggregateError> {
        let period = PeriodYearInput::from_params(raw_params).ok_or_else(|| {
            ZoneAggregateError::InvalidParams(serde_json::Error::custom(format!(
                "{PERIOD_YEAR_FIELD} must be an integer year or \"latest\""
            )))
        })?;

        let mut rest = raw_params.clone();
        rest.remove(PERIOD_YEAR_FIELD);
        rest.remove(PERIOD_YEAR_ALIAS_FIELD);

        let mut params = match plugin.params_schema().parse(Value::Object(rest))? {
            Value::Object(map) => map,
            other => {
                return Err(ZoneAggregateError::Compute {
                    message: format!(
                        "schema '{}' produced a non-object: {other}",
                        plugin.params_schema().name()
                    ),
                });
            }
        };
        params.remove(PERIOD_YEAR_FIELD);

        let period_year = match period {
            PeriodYearInput::Year(year) => year,
            PeriodYearInput::Latest => {
                let family_hash = hash_params_family(&params)?;
                let latest = self
                    .geo_store
                    .get_latest_period_year(plugin.id(), &family_hash)
                    .await?
                    .ok_or_else(|| {
                        ZoneAggregateError::no_data(
                            plugin.id(),
                            "no geo values exist for these parameters in any period",
                        )
                    })?;
                log::debug!(
                    "Resolved latest period for {} family={family_hash} to {latest}",
                    plugin.id()
                );
                latest
            }
        };

        params.insert(PERIOD_YEAR_FIELD.to_string(), Value::from(period_year));
        let params_hash = hash_aggregate_params(&params)?;

        Ok(ResolvedParams {
            period_year,
            params,
            params_hash,
        })
    }

    /// Runs every request independently. One item's failure never affects
    /// its siblings; both lists keep request order.
    pub async fn get_many(&self, zone_id: &str, requests: Vec<AggregateRequest>) -> BatchResponse {
        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let outcome = self
                .get_aggregate(zone_id, &request.aggregate_id, &request.params)
                .await;
            (request, outcome)
        }))
        .await;

        let mut response = BatchResponse::default();
        for (request, outcome) in outcomes {
            match outcome {
                Ok(result) => response.results.push(BatchResultItem {
                    aggregate_id: request.aggregate_id,
                    params: request.params,
                    result,
                }),
                Err(e) => {
                    log::warn!(
                        "Batch item {} for zone {zone_id} failed: {e}",
                        request.aggregate_id
                    );
                    response.errors.push(BatchErrorItem {
                        aggregate_id: request.aggregate_id,
                        params: request.params,
                        code: e.code().to_string(),
                        message: e.to_string(),
                        details: e.details(),
                    });
                }
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use crate::combine::{WeightedMean, round_to};
    use crate::memory::{MemoryGeoAggregateStore, MemoryZoneAggregateStore, MemoryZoneGeoMapStore};
    use crate::schema::{Schema, SerdeSchema};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use zonestat_aggregates_models::{
        AggregateDisplay, GeoAggregateValue, ZoneGeoWeightRecord,
    };

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CountParams {
        #[serde(default = "default_segment")]
        segment: String,
    }

    fn default_segment() -> String {
        "all".to_string()
    }

    #[derive(Serialize, Deserialize)]
    struct CountPayload {
        value: f64,
    }

    /// Weighted mean of `value` over the zone.
    struct CountPlugin {
        display: AggregateDisplay,
        params: SerdeSchema<CountParams>,
        output: SerdeSchema<CountPayload>,
    }

    impl CountPlugin {
        fn new() -> Self {
            Self {
                display: AggregateDisplay {
                    id: "count.v1".to_string(),
                    label: "Count".to_string(),
                    description: String::new(),
                    category: "test".to_string(),
                    unit: None,
                },
                params: SerdeSchema::new("count params"),
                output: SerdeSchema::new("count payload"),
            }
        }
    }

    #[async_trait]
    impl AggregatePlugin for CountPlugin {
        fn id(&self) -> &str {
            "count.v1"
        }

        fn display(&self) -> &AggregateDisplay {
            &self.display
        }

        fn params_schema(&self) -> &dyn Schema {
            &self.params
        }

        fn output_schema(&self) -> &dyn Schema {
            &self.output
        }

        fn preferred_geo_level(&self) -> Option<&str> {
            Some("sector")
        }

        async fn compute(
            &self,
            ctx: &ComputeContext<'_>,
        ) -> Result<AggregateResult, ZoneAggregateError> {
            let codes = ctx
                .zone_geo_weights
                .iter()
                .map(|w| w.geo_code.clone())
                .collect();
            let values = ctx
                .geo_store
                .get_geo_values(&ctx.geo_values_query("sector", codes))
                .await?;

            let total: f64 = ctx.zone_geo_weights.iter().map(|w| w.weight).sum();
            let mut mean = WeightedMean::default();
            for weight in ctx.zone_geo_weights {
                let value = values
                    .iter()
                    .find(|v| v.geo_code == weight.geo_code)
                    .and_then(|v| self.output.parse_typed(v.payload.clone()).ok())
                    .map(|p| p.value);
                mean.add(value, weight.weight);
            }

            if mean.weight() <= 0.0 {
                return Err(ctx.no_data("no geo values cover the zone"));
            }

            Ok(ctx.result(
                round_to(mean.weight() / total, 4),
                "test".to_string(),
                "1".to_string(),
                json!({ "value": mean.value().map(|v| round_to(v, 2)) }),
            ))
        }
    }

    struct Fixture {
        service: ZoneAggregatesService,
        aggregates: Arc<MemoryZoneAggregateStore>,
        geo: Arc<MemoryGeoAggregateStore>,
        zones: Arc<MemoryZoneGeoMapStore>,
    }

    fn fixture() -> Fixture {
        let mut registry = AggregateRegistry::new();
        registry.register(Arc::new(CountPlugin::new())).unwrap();

        let aggregates = Arc::new(MemoryZoneAggregateStore::new());
        let geo = Arc::new(MemoryGeoAggregateStore::new());
        let zones = Arc::new(MemoryZoneGeoMapStore::new());

        Fixture {
            service: ZoneAggregatesService::new(
                Arc::new(registry),
                aggregates.clone(),
                geo.clone(),
                zones.clone(),
            ),
            aggregates,
            geo,
            zones,
        }
    }

    fn bag(value: Value) -> ParamsBag {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn count_value(code: &str, year: i32, segment: &str, value: f64) -> GeoAggregateValue {
        let mut params = bag(json!({ "segment": segment }));
        params.insert(PERIOD_YEAR_FIELD.to_string(), json!(year));
        GeoAggregateValue {
            aggregate_id: "count.v1".to_string(),
            period_year: year,
            geo_level: "sector".to_string(),
            geo_code: code.to_string(),
            params_hash: hash_aggregate_params(&params).unwrap(),
            params_family_hash: hash_params_family(&params).unwrap(),
            source: "test".to_string(),
            source_version: "1".to_string(),
            payload: json!({ "value": value }),
        }
    }

    async fn seed_zone(fixture: &Fixture) {
        fixture
            .zones
            .upsert_zone_geo_weights_batch(&[
                ZoneGeoWeightRecord {
                    zone_id: "city".to_string(),
                    geo_level: "sector".to_string(),
                    geo_code: "A".to_string(),
                    weight: 0.6,
                },
                ZoneGeoWeightRecord {
                    zone_id: "city".to_string(),
                    geo_level: "sector".to_string(),
                    geo_code: "B".to_string(),
                    weight: 0.4,
                },
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_aggregate_fails_even_with_valid_params() {
        let fixture = fixture();
        let err = fixture
            .service
            .get_aggregate("city", "missing.v1", &bag(json!({"periodYear": 2024})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownAggregate);
    }

    #[tokio::test]
    async fn latest_resolves_to_newest_year_in_family() {
        let fixture = fixture();
        seed_zone(&fixture).await;
        fixture
            .geo
            .upsert_geo_values_batch(&[
                count_value("A", 2023, "all", 1.0),
                count_value("A", 2025, "all", 3.0),
                count_value("A", 2024, "all", 2.0),
                count_value("A", 2030, "other", 9.0),
            ])
            .await
            .unwrap();

        for params in [json!({}), json!({"periodYear": "latest"}), json!({"year": "latest"})] {
            let result = fixture
                .service
                .get_aggregate("city", "count.v1", &bag(params))
                .await
                .unwrap();
            assert_eq!(result.base.period_year, 2025);
            assert_eq!(result.payload, json!({"value": 3.0}));
        }
    }

    #[tokio::test]
    async fn explicit_year_skips_resolution() {
        let fixture = fixture();
        seed_zone(&fixture).await;
        fixture
            .geo
            .upsert_geo_values_batch(&[
                count_value("A", 2023, "all", 1.0),
                count_value("A", 2025, "all", 3.0),
            ])
            .await
            .unwrap();

        let result = fixture
            .service
            .get_aggregate("city", "count.v1", &bag(json!({"year": "2023"})))
            .await
            .unwrap();
        assert_eq!(result.base.period_year, 2023);
        assert_eq!(result.payload, json!({"value": 1.0}));
    }

    #[tokio::test]
    async fn latest_without_any_data_is_no_data() {
        let fixture = fixture();
        seed_zone(&fixture).await;
        let err = fixture
            .service
            .get_aggregate("city", "count.v1", &ParamsBag::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoData);
        assert!(fixture.aggregates.is_empty());
    }

    #[tokio::test]
    async fn explicit_year_without_overlap_is_no_data() {
        let fixture = fixture();
        let err = fixture
            .service
            .get_aggregate("city", "count.v1", &bag(json!({"periodYear": 2024})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoData);
    }

    #[tokio::test]
    async fn malformed_period_year_is_invalid_params() {
        let fixture = fixture();
        let err = fixture
            .service
            .get_aggregate("city", "count.v1", &bag(json!({"periodYear": "soon"})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_params() {
        let fixture = fixture();
        let err = fixture
            .service
            .get_aggregate(
                "city",
                "count.v1",
                &bag(json!({"periodYear": 2024, "segment": 5})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneAggregateError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn resolved_params_hash_ignores_key_order_and_defaults() {
        let fixture = fixture();
        let plugin = fixture.service.registry().get("count.v1").unwrap();

        let explicit = fixture
            .service
            .resolve_params(plugin, &bag(json!({"segment": "all", "periodYear": 2024})))
            .await
            .unwrap();
        let defaulted = fixture
            .service
            .resolve_params(plugin, &bag(json!({"year": 2024})))
            .await
            .unwrap();

        assert_eq!(explicit, defaulted);
        assert_eq!(
            explicit.params,
            bag(json!({"periodYear": 2024, "segment": "all"}))
        );
    }

    #[tokio::test]
    async fn second_identical_call_is_served_from_cache() {
        let fixture = fixture();
        seed_zone(&fixture).await;
        fixture
            .geo
            .upsert_geo_values_batch(&[
                count_value("A", 2024, "all", 30.0),
                count_value("B", 2024, "all", 40.0),
            ])
            .await
            .unwrap();

        let first = fixture
            .service
            .get_aggregate("city", "count.v1", &bag(json!({"periodYear": 2024})))
            .await
            .unwrap();
        assert_eq!(fixture.geo.value_read_count(), 1);
        assert_eq!(fixture.aggregates.write_count(), 1);

        let second = fixture
            .service
            .get_aggregate(
                "city",
                "count.v1",
                &bag(json!({"segment": "all", "periodYear": "2024"})),
            )
            .await
            .unwrap();

        assert_eq!(fixture.geo.value_read_count(), 1);
        assert_eq!(fixture.aggregates.write_count(), 1);
        assert_eq!(first, second);
        assert_eq!(first.payload, json!({"value": 34.0}));
        assert!((first.base.coverage - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let fixture = fixture();
        seed_zone(&fixture).await;
        fixture
            .geo
            .upsert_geo_values_batch(&[count_value("A", 2024, "all", 30.0)])
            .await
            .unwrap();

        let response = fixture
            .service
            .get_many(
                "city",
                vec![
                    AggregateRequest {
                        aggregate_id: "count.v1".to_string(),
                        params: bag(json!({"periodYear": 2024})),
                    },
                    AggregateRequest {
                        aggregate_id: "nope.v1".to_string(),
                        params: bag(json!({"periodYear": 2024})),
                    },
                ],
            )
            .await;

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.errors.len(), 1);

        let ok = &response.results[0];
        assert_eq!(ok.aggregate_id, "count.v1");
        assert_eq!(ok.result.payload, json!({"value": 30.0}));
        assert!((ok.result.base.coverage - 0.6).abs() < 1e-9);

        let failed = &response.errors[0];
        assert_eq!(failed.aggregate_id, "nope.v1");
        assert_eq!(failed.code, "UNKNOWN_AGGREGATE");
        assert_eq!(failed.details, Some(json!({"aggregateId": "nope.v1"})));
        assert_eq!(failed.params, bag(json!({"periodYear": 2024})));
    }
}
