#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data model for zone aggregates.
//!
//! Raw statistics are published per geo code ([`GeoAggregateValue`]) and
//! combined into zone-level results ([`ZoneAggregateRecord`]) using the
//! zone's [`ZoneGeoWeight`] distribution. Everything here serializes as
//! camelCase JSON so the same shapes travel through stores, seed files,
//! and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a registered aggregate computation (e.g. `"rent.v1"`).
pub type AggregateId = String;

/// Untyped parameter bag as received from callers.
///
/// Every plugin narrows this through its own parameter schema before any
/// value reaches the aggregation arithmetic.
pub type ParamsBag = serde_json::Map<String, serde_json::Value>;

/// Canonical name of the period year parameter.
pub const PERIOD_YEAR_FIELD: &str = "periodYear";

/// Accepted alias for [`PERIOD_YEAR_FIELD`].
pub const PERIOD_YEAR_ALIAS_FIELD: &str = "year";

/// Sentinel value requesting the newest available period.
pub const LATEST_SENTINEL: &str = "latest";

/// How a caller asked for the period year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodYearInput {
    /// No concrete year: resolve the newest year with data.
    Latest,
    /// A concrete year.
    Year(i32),
}

impl PeriodYearInput {
    /// Reads the period year from a raw parameter bag.
    ///
    /// `periodYear` wins over the `year` alias unless it is `null`, which
    /// counts as absent. A missing field and the `"latest"` sentinel both
    /// mean [`Self::Latest`]. Any other value that is not an integer year
    /// yields `None`, which the service rejects as `INVALID_PARAMS`.
    #[must_use]
    pub fn from_params(params: &ParamsBag) -> Option<Self> {
        let value = [PERIOD_YEAR_FIELD, PERIOD_YEAR_ALIAS_FIELD]
            .into_iter()
            .filter_map(|field| params.get(field))
            .find(|v| !v.is_null());

        match value {
            None => Some(Self::Latest),
            Some(serde_json::Value::String(s)) if s.eq_ignore_ascii_case(LATEST_SENTINEL) => {
                Some(Self::Latest)
            }
            Some(serde_json::Value::String(s)) => s.trim().parse().ok().map(Self::Year),
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Self::Year),
            Some(_) => None,
        }
    }

    /// Returns the concrete year, if any.
    #[must_use]
    pub const fn year(self) -> Option<i32> {
        match self {
            Self::Latest => None,
            Self::Year(year) => Some(year),
        }
    }
}

/// Contribution of one geo code to a zone.
///
/// Weights are non-negative and need not sum to 1; partial coverage is
/// tracked rather than normalized away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneGeoWeight {
    /// Geo code identifier at `geo_level`.
    pub geo_code: String,
    /// Fractional overlap of the geo code with the zone.
    pub weight: f64,
    /// Geo level the code belongs to (e.g. `"postcode_sector"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_level: Option<String>,
}

/// A stored zone-to-geo-code weight row, as written by offline importers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneGeoWeightRecord {
    /// Consumer-facing zone identifier.
    pub zone_id: String,
    /// Geo level of `geo_code`.
    pub geo_level: String,
    /// Geo code identifier.
    pub geo_code: String,
    /// Fractional overlap of the geo code with the zone.
    pub weight: f64,
}

impl From<ZoneGeoWeightRecord> for ZoneGeoWeight {
    fn from(record: ZoneGeoWeightRecord) -> Self {
        Self {
            geo_code: record.geo_code,
            weight: record.weight,
            geo_level: Some(record.geo_level),
        }
    }
}

/// A raw geo-level input value for one aggregate and period.
///
/// Keyed by `(aggregate_id, period_year, geo_level, geo_code, params_hash)`.
/// Re-imports overwrite in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoAggregateValue {
    /// Aggregate this value feeds.
    pub aggregate_id: AggregateId,
    /// Period (year) the value describes.
    pub period_year: i32,
    /// Geo level of `geo_code`.
    pub geo_level: String,
    /// Geo code identifier.
    pub geo_code: String,
    /// Hash of the fully-resolved parameter set.
    pub params_hash: String,
    /// Hash of the parameter set with the period year erased.
    pub params_family_hash: String,
    /// Upstream data source name.
    pub source: String,
    /// Upstream data source version.
    pub source_version: String,
    /// Plugin-specific payload, validated against the plugin output schema.
    pub payload: serde_json::Value,
}

/// Lookup key for a cached zone-level result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneAggregateKey {
    /// Zone identifier.
    pub zone_id: String,
    /// Aggregate identifier.
    pub aggregate_id: AggregateId,
    /// Resolved period year.
    pub period_year: i32,
    /// Hash of the fully-resolved parameters.
    pub params_hash: String,
}

/// Query for the geo values of a set of geo codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoValuesQuery {
    /// Aggregate identifier.
    pub aggregate_id: AggregateId,
    /// Resolved period year.
    pub period_year: i32,
    /// Geo level to read.
    pub geo_level: String,
    /// Geo codes to read.
    pub geo_codes: Vec<String>,
    /// Hash of the fully-resolved parameters.
    pub params_hash: String,
}

/// Metadata shared by every zone-level result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBase {
    /// Zone identifier.
    pub zone_id: String,
    /// Aggregate identifier.
    pub aggregate_id: AggregateId,
    /// Resolved period year.
    pub period_year: i32,
    /// Hash of the fully-resolved parameters.
    pub params_hash: String,
    /// Fraction of the zone's total weight that had data, in `[0, 1]`.
    ///
    /// Anything below 1 is a partial, approximate result.
    pub coverage: f64,
    /// Upstream data source name.
    pub source: String,
    /// Upstream data source version.
    pub source_version: String,
    /// When the result was computed.
    pub computed_at: DateTime<Utc>,
}

/// A zone-level result: shared metadata plus the plugin payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Shared result metadata.
    pub base: AggregateBase,
    /// Plugin-specific result payload.
    pub payload: serde_json::Value,
}

impl AggregateResult {
    /// Returns the store key of this result.
    #[must_use]
    pub fn key(&self) -> ZoneAggregateKey {
        ZoneAggregateKey {
            zone_id: self.base.zone_id.clone(),
            aggregate_id: self.base.aggregate_id.clone(),
            period_year: self.base.period_year,
            params_hash: self.base.params_hash.clone(),
        }
    }
}

/// A persisted zone-level result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneAggregateRecord {
    /// Zone identifier.
    pub zone_id: String,
    /// Aggregate identifier.
    pub aggregate_id: AggregateId,
    /// Resolved period year.
    pub period_year: i32,
    /// Hash of the fully-resolved parameters.
    pub params_hash: String,
    /// Fraction of the zone's total weight that had data.
    pub coverage: f64,
    /// Upstream data source name.
    pub source: String,
    /// Upstream data source version.
    pub source_version: String,
    /// When the result was computed.
    pub computed_at: DateTime<Utc>,
    /// Plugin-specific result payload.
    pub payload: serde_json::Value,
}

impl ZoneAggregateRecord {
    /// Returns the store key of this record.
    #[must_use]
    pub fn key(&self) -> ZoneAggregateKey {
        ZoneAggregateKey {
            zone_id: self.zone_id.clone(),
            aggregate_id: self.aggregate_id.clone(),
            period_year: self.period_year,
            params_hash: self.params_hash.clone(),
        }
    }
}

impl From<AggregateResult> for ZoneAggregateRecord {
    fn from(result: AggregateResult) -> Self {
        let AggregateResult { base, payload } = result;
        Self {
            zone_id: base.zone_id,
            aggregate_id: base.aggregate_id,
            period_year: base.period_year,
            params_hash: base.params_hash,
            coverage: base.coverage,
            source: base.source,
            source_version: base.source_version,
            computed_at: base.computed_at,
            payload,
        }
    }
}

impl From<ZoneAggregateRecord> for AggregateResult {
    fn from(record: ZoneAggregateRecord) -> Self {
        Self {
            base: AggregateBase {
                zone_id: record.zone_id,
                aggregate_id: record.aggregate_id,
                period_year: record.period_year,
                params_hash: record.params_hash,
                coverage: record.coverage,
                source: record.source,
                source_version: record.source_version,
                computed_at: record.computed_at,
            },
            payload: record.payload,
        }
    }
}

/// Human-facing description of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDisplay {
    /// Aggregate identifier this metadata describes.
    pub id: AggregateId,
    /// Short label (e.g. `"Rent"`).
    pub label: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Grouping used by front ends (e.g. `"housing"`).
    #[serde(default)]
    pub category: String,
    /// Unit of the headline value (e.g. `"GBP/month"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One entry of a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    /// Aggregate to compute.
    pub aggregate_id: AggregateId,
    /// Raw parameters for the aggregate.
    #[serde(default)]
    pub params: ParamsBag,
}

/// A successful batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultItem {
    /// Aggregate that was computed.
    pub aggregate_id: AggregateId,
    /// Raw parameters as supplied by the caller.
    pub params: ParamsBag,
    /// The computed or cached result.
    pub result: AggregateResult,
}

/// A failed batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchErrorItem {
    /// Aggregate that failed.
    pub aggregate_id: AggregateId,
    /// Raw parameters as supplied by the caller.
    pub params: ParamsBag,
    /// Stable error code (e.g. `"NO_DATA"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured error details, if any.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Response of a batch request. Both lists may be non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Successful items, in request order.
    pub results: Vec<BatchResultItem>,
    /// Failed items, in request order.
    pub errors: Vec<BatchErrorItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: serde_json::Value) -> ParamsBag {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn missing_period_year_means_latest() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"bedrooms": "2"}))),
            Some(PeriodYearInput::Latest)
        );
    }

    #[test]
    fn latest_sentinel_means_latest() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": "latest"}))),
            Some(PeriodYearInput::Latest)
        );
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"year": "LATEST"}))),
            Some(PeriodYearInput::Latest)
        );
    }

    #[test]
    fn null_period_year_falls_back_to_alias() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": null, "year": 2023}))),
            Some(PeriodYearInput::Year(2023))
        );
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": null, "year": null}))),
            Some(PeriodYearInput::Latest)
        );
    }

    #[test]
    fn concrete_year_from_number_or_string() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": 2024}))),
            Some(PeriodYearInput::Year(2024))
        );
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"year": "2023"}))),
            Some(PeriodYearInput::Year(2023))
        );
    }

    #[test]
    fn period_year_wins_over_alias() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": 2025, "year": 2020}))),
            Some(PeriodYearInput::Year(2025))
        );
    }

    #[test]
    fn garbage_year_is_unresolved() {
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": "soon"}))),
            None
        );
        assert_eq!(
            PeriodYearInput::from_params(&bag(json!({"periodYear": [2024]}))),
            None
        );
    }

    #[test]
    fn record_and_result_convert_losslessly() {
        let record = ZoneAggregateRecord {
            zone_id: "zone-1".to_string(),
            aggregate_id: "rent.v1".to_string(),
            period_year: 2024,
            params_hash: "abc".to_string(),
            coverage: 0.6,
            source: "ons".to_string(),
            source_version: "2024-06".to_string(),
            computed_at: Utc::now(),
            payload: json!({"median": 30.0}),
        };

        let result = AggregateResult::from(record.clone());
        assert_eq!(result.key(), record.key());
        assert_eq!(ZoneAggregateRecord::from(result), record);
    }

    #[test]
    fn batch_request_params_default_to_empty() {
        let request: AggregateRequest =
            serde_json::from_value(json!({"aggregateId": "rent.v1"})).unwrap();
        assert!(request.params.is_empty());
    }
}
