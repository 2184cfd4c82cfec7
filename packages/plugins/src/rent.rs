//! `rent.v1`: weighted private rent statistics for a zone.
//!
//! Rent values are published per geo code. The zone value of each
//! statistic is the weight-averaged value over the geo codes that
//! published it, with min/max taken unweighted. Coverage is the share of
//! the zone's weight whose geo codes published a median.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};
use zonestat_aggregates::ZoneAggregateError;
use zonestat_aggregates::combine::{Extent, FirstSeen, WeightedMean, round_to};
use zonestat_aggregates::plugin::{AggregatePlugin, ComputeContext};
use zonestat_aggregates::schema::{Schema, SerdeSchema, coerce};
use zonestat_aggregates_models::{AggregateDisplay, AggregateResult, GeoAggregateValue};

/// Aggregate id of this plugin.
pub const RENT_AGGREGATE_ID: &str = "rent.v1";

/// Geo level rent values are published at.
pub const RENT_GEO_LEVEL: &str = "postcode_sector";

/// Decimal places kept on rent values.
const VALUE_DECIMALS: i32 = 2;

/// Decimal places kept on coverage.
const COVERAGE_DECIMALS: i32 = 4;

/// Smallest reportable coverage for a zone with any covered weight.
const MIN_COVERAGE: f64 = 0.0001;

/// Bedroom segment.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(try_from = "serde_json::Value", into = "&'static str")]
pub enum Bedrooms {
    /// Every bedroom count.
    #[default]
    #[strum(serialize = "all")]
    All,
    /// One bedroom (studios included).
    #[strum(serialize = "1")]
    One,
    /// Two bedrooms.
    #[strum(serialize = "2")]
    Two,
    /// Three bedrooms.
    #[strum(serialize = "3")]
    Three,
    /// Four or more bedrooms.
    #[strum(serialize = "4+")]
    FourPlus,
}

impl TryFrom<serde_json::Value> for Bedrooms {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let text = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => match n.as_u64() {
                Some(v) if v >= 4 => "4+".to_string(),
                _ => n.to_string(),
            },
            other => return Err(format!("invalid bedrooms value: {other}")),
        };

        text.trim().to_ascii_lowercase().parse().map_err(|_| {
            format!("invalid bedrooms value \"{text}\": expected all, 1, 2, 3, or 4+")
        })
    }
}

/// Property type segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Every property type.
    #[default]
    All,
    /// Flats and maisonettes.
    Flat,
    /// Houses.
    House,
}

/// Request parameters of `rent.v1`. The period year is resolved by the
/// service and is not part of this shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentParams {
    /// Bedroom segment.
    #[serde(default)]
    pub bedrooms: Bedrooms,
    /// Property type segment.
    #[serde(default)]
    pub property_type: PropertyType,
}

/// Rent statistics published for one geo code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentGeoPayload {
    /// Median monthly rent.
    pub median: f64,
    /// Mean monthly rent.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub mean: Option<f64>,
    /// Lower quartile.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub p25: Option<f64>,
    /// Upper quartile.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub p75: Option<f64>,
    /// Lower bound of the modelled range.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub predicted_lower: Option<f64>,
    /// Upper bound of the modelled range.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub predicted_upper: Option<f64>,
    /// Lowest observed rent.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub min: Option<f64>,
    /// Highest observed rent.
    #[serde(default, deserialize_with = "coerce::optional_f64")]
    pub max: Option<f64>,
    /// Number of observations behind the statistics.
    #[serde(default, deserialize_with = "coerce::optional_u32")]
    pub sample_size: Option<u32>,
    /// Attribution string required by the publisher.
    #[serde(default)]
    pub attribution: Option<String>,
}

impl RentGeoPayload {
    /// Checks constraints `serde` cannot express.
    fn check(&self) -> Result<(), String> {
        if !self.median.is_finite() || self.median < 0.0 {
            return Err(format!("median must be a non-negative number, got {}", self.median));
        }
        match (self.p25, self.p75) {
            (Some(lo), Some(hi)) if lo > hi => Err(format!("p25 ({lo}) exceeds p75 ({hi})")),
            _ => Ok(()),
        }
    }
}

/// Zone-level rent result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentZonePayload {
    /// Weighted median.
    pub median: Option<f64>,
    /// Weighted mean.
    pub mean: Option<f64>,
    /// Weighted lower quartile.
    pub p25: Option<f64>,
    /// Weighted upper quartile.
    pub p75: Option<f64>,
    /// Weighted lower modelled bound.
    pub predicted_lower: Option<f64>,
    /// Weighted upper modelled bound.
    pub predicted_upper: Option<f64>,
    /// Unweighted minimum.
    pub min: Option<f64>,
    /// Unweighted maximum.
    pub max: Option<f64>,
    /// Total observations across contributing geo codes.
    pub sample_size: Option<u64>,
    /// Geo level the values were read at.
    pub geo_level: String,
    /// Geo codes in the zone at `geo_level`.
    pub geo_codes_total: usize,
    /// Geo codes that contributed a median.
    pub geo_codes_with_data: usize,
    /// Attribution of the first contributing geo code.
    pub attribution: Option<String>,
}

#[derive(Default)]
struct RentAccumulator {
    median: WeightedMean,
    mean: WeightedMean,
    p25: WeightedMean,
    p75: WeightedMean,
    predicted_lower: WeightedMean,
    predicted_upper: WeightedMean,
    min: Extent,
    max: Extent,
    sample_size: Option<u64>,
    geo_codes_with_data: usize,
}

impl RentAccumulator {
    fn add(&mut self, payload: &RentGeoPayload, weight: f64) {
        if self.median.add(Some(payload.median), weight) {
            self.geo_codes_with_data += 1;
        }
        self.mean.add(payload.mean, weight);
        self.p25.add(payload.p25, weight);
        self.p75.add(payload.p75, weight);
        self.predicted_lower.add(payload.predicted_lower, weight);
        self.predicted_upper.add(payload.predicted_upper, weight);
        self.min.add(payload.min);
        self.max.add(payload.max);
        if let Some(n) = payload.sample_size {
            *self.sample_size.get_or_insert(0) += u64::from(n);
        }
    }
}

fn rounded(mean: &WeightedMean) -> Option<f64> {
    mean.value().map(|v| round_to(v, VALUE_DECIMALS))
}

/// The `rent.v1` plugin.
pub struct RentPlugin {
    display: AggregateDisplay,
    params: SerdeSchema<RentParams>,
    output: SerdeSchema<RentGeoPayload>,
}

impl Default for RentPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl RentPlugin {
    /// Creates the plugin with its embedded display metadata.
    ///
    /// # Panics
    ///
    /// Panics if the embedded display TOML is malformed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            display: crate::registry::display_for(RENT_AGGREGATE_ID),
            params: SerdeSchema::new("RentParams"),
            output: SerdeSchema::new("RentGeoPayload"),
        }
    }

    /// Validates a stored geo payload, logging and dropping invalid ones.
    fn parse_payload(&self, value: &GeoAggregateValue, log_target: &str) -> Option<RentGeoPayload> {
        let parsed = self
            .output
            .parse_typed(value.payload.clone())
            .map_err(|e| e.to_string())
            .and_then(|payload| payload.check().map(|()| payload));

        match parsed {
            Ok(payload) => Some(payload),
            Err(e) => {
                log::warn!(
                    target: log_target,
                    "Dropping invalid {} payload for {} {} ({}): {e}",
                    value.aggregate_id,
                    value.geo_level,
                    value.geo_code,
                    value.period_year,
                );
                None
            }
        }
    }
}

#[async_trait]
impl AggregatePlugin for RentPlugin {
    fn id(&self) -> &str {
        RENT_AGGREGATE_ID
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
        Some(RENT_GEO_LEVEL)
    }

    async fn compute(
        &self,
        ctx: &ComputeContext<'_>,
    ) -> Result<AggregateResult, ZoneAggregateError> {
        let geo_level = ctx
            .zone_geo_weights
            .iter()
            .find_map(|w| w.geo_level.as_deref())
            .unwrap_or(RENT_GEO_LEVEL)
            .to_string();

        let weights: Vec<_> = ctx
            .zone_geo_weights
            .iter()
            .filter(|w| w.geo_level.as_deref().is_none_or(|level| level == geo_level))
            .filter(|w| {
                let usable = w.weight.is_finite() && w.weight >= 0.0;
                if !usable {
                    log::warn!(
                        target: ctx.log_target,
                        "Ignoring invalid weight {} for {} in zone {}",
                        w.weight,
                        w.geo_code,
                        ctx.zone_id,
                    );
                }
                usable
            })
            .collect();

        if weights.len() < ctx.zone_geo_weights.len() {
            log::debug!(
                target: ctx.log_target,
                "Using {} of {} weights for zone {} at {geo_level}",
                weights.len(),
                ctx.zone_geo_weights.len(),
                ctx.zone_id,
            );
        }

        let total_weight: f64 = weights.iter().map(|w| w.weight).sum();
        if total_weight <= 0.0 {
            return Err(ctx.no_data(format!(
                "zone {} has no geo weights at {geo_level}",
                ctx.zone_id
            )));
        }

        let mut geo_codes: Vec<String> = Vec::with_capacity(weights.len());
        for w in &weights {
            if !geo_codes.contains(&w.geo_code) {
                geo_codes.push(w.geo_code.clone());
            }
        }
        let geo_codes_total = geo_codes.len();

        let values = ctx
            .geo_store
            .get_geo_values(&ctx.geo_values_query(&geo_level, geo_codes))
            .await?;

        let mut by_code: BTreeMap<&str, (&GeoAggregateValue, RentGeoPayload)> = BTreeMap::new();
        for value in &values {
            if by_code.contains_key(value.geo_code.as_str()) {
                continue;
            }
            if let Some(payload) = self.parse_payload(value, ctx.log_target) {
                by_code.insert(value.geo_code.as_str(), (value, payload));
            }
        }

        let mut acc = RentAccumulator::default();
        let mut source = FirstSeen::new("source");
        let mut source_version = FirstSeen::new("sourceVersion");
        let mut attribution = FirstSeen::new("attribution");

        for w in weights.iter().filter(|w| w.weight > 0.0) {
            let Some((value, payload)) = by_code.get(w.geo_code.as_str()) else {
                continue;
            };
            acc.add(payload, w.weight);
            source.offer(Some(value.source.as_str()), &w.geo_code, ctx.log_target);
            source_version.offer(Some(value.source_version.as_str()), &w.geo_code, ctx.log_target);
            attribution.offer(payload.attribution.as_deref(), &w.geo_code, ctx.log_target);
        }

        let covered_weight = acc.median.weight();
        if covered_weight <= 0.0 {
            return Err(ctx.no_data(format!(
                "no rent values cover zone {} in {}",
                ctx.zone_id, ctx.period_year
            )));
        }
        let coverage = round_to((covered_weight / total_weight).min(1.0), COVERAGE_DECIMALS)
            .max(MIN_COVERAGE);

        let payload = RentZonePayload {
            median: rounded(&acc.median),
            mean: rounded(&acc.mean),
            p25: rounded(&acc.p25),
            p75: rounded(&acc.p75),
            predicted_lower: rounded(&acc.predicted_lower),
            predicted_upper: rounded(&acc.predicted_upper),
            min: acc.min.min().map(|v| round_to(v, VALUE_DECIMALS)),
            max: acc.max.max().map(|v| round_to(v, VALUE_DECIMALS)),
            sample_size: acc.sample_size,
            geo_level,
            geo_codes_total,
            geo_codes_with_data: acc.geo_codes_with_data,
            attribution: attribution.into_value(),
        };

        Ok(ctx.result(
            coverage,
            source.into_value().unwrap_or_default(),
            source_version.into_value().unwrap_or_default(),
            serde_json::to_value(payload).map_err(|e| ZoneAggregateError::Compute {
                message: format!("failed to serialize rent payload: {e}"),
            })?,
        ))
    }
}
