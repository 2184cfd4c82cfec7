//! Canonical, order-independent hashing of parameter sets.
//!
//! Values are serialized in JCS form (RFC 8785) with sorted object keys,
//! compact separators and array order kept, so two parameter bags that
//! differ only in key insertion order produce the same SHA-256 digest.
//! These digests are the content addresses used as cache and storage keys.

use serde_json::Value;
use sha2::{Digest, Sha256};
use zonestat_aggregates_models::{PERIOD_YEAR_ALIAS_FIELD, PERIOD_YEAR_FIELD, ParamsBag};

/// Placeholder period year substituted when computing a family hash.
///
/// Importers and the service must agree on this value; changing it
/// invalidates every stored `params_family_hash`.
pub const FAMILY_PERIOD_YEAR_SENTINEL: i64 = 0;

/// Serializes `value` to its RFC 8785 (JCS) canonical JSON string.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if the value cannot be serialized.
pub fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    serde_jcs::to_string(value)
}

/// Returns the lowercase hex SHA-256 digest of the canonical form of `value`.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if the value cannot be canonicalized.
pub fn hash_value(value: &Value) -> Result<String, serde_json::Error> {
    let digest = Sha256::digest(canonical_json(value)?.as_bytes());
    Ok(hex::encode(digest))
}

/// Hashes a fully-resolved aggregate parameter set.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if the parameters cannot be canonicalized.
pub fn hash_aggregate_params(params: &ParamsBag) -> Result<String, serde_json::Error> {
    hash_value(&Value::Object(params.clone()))
}

/// Hashes a parameter set with its period year replaced by
/// [`FAMILY_PERIOD_YEAR_SENTINEL`].
///
/// Requests that differ only by period year (including no year at all)
/// share the same family hash.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if the parameters cannot be canonicalized.
pub fn hash_params_family(params: &ParamsBag) -> Result<String, serde_json::Error> {
    let mut family = params.clone();
    family.remove(PERIOD_YEAR_ALIAS_FIELD);
    family.insert(
        PERIOD_YEAR_FIELD.to_string(),
        Value::from(FAMILY_PERIOD_YEAR_SENTINEL),
    );
    hash_value(&Value::Object(family))
}
