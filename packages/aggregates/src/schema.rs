//! Parameter and payload schemas.
//!
//! A schema narrows an untyped JSON value into a plugin's typed shape,
//! applying defaults, and hands back the normalized JSON. Schemas are
//! backed by `serde`: the typed struct is the schema definition and
//! `serde_json::Error` is the validation error.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A validator for untyped JSON values.
pub trait Schema: Send + Sync {
    /// Name of the validated shape, for logs and registration checks.
    fn name(&self) -> &str;

    /// Validates `value` and returns its normalized form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error describing the first violation.
    fn parse(&self, value: Value) -> Result<Value, serde_json::Error>;
}

/// A [`Schema`] defined by a `serde` type.
///
/// Parsing deserializes into `T` (which applies `#[serde(default)]`s and
/// drops unknown fields unless `T` denies them) and serializes back.
pub struct SerdeSchema<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    /// Creates a schema named `name`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> SerdeSchema<T> {
    /// Validates `value` into the typed shape.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error describing the first violation.
    pub fn parse_typed(&self, value: Value) -> Result<T, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl<T: DeserializeOwned + Serialize> Schema for SerdeSchema<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn parse(&self, value: Value) -> Result<Value, serde_json::Error> {
        let typed: T = serde_json::from_value(value)?;
        serde_json::to_value(typed)
    }
}

/// Deserialization helpers for values that arrive as strings from query
/// strings but as numbers from JSON bodies.
pub mod coerce {
    use serde::{Deserialize, Deserializer, de::Error as _};
    use serde_json::Value;

    fn to_f64<E: serde::de::Error>(value: Value) -> Result<Option<f64>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| E::custom(format!("invalid number: {n}"))),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| E::custom(format!("expected a number, got \"{s}\""))),
            other => Err(E::custom(format!("expected a number, got {other}"))),
        }
    }

    /// Deserializes an optional number given either as a JSON number or a
    /// numeric string. Use with `#[serde(default)]`.
    ///
    /// # Errors
    ///
    /// Fails if the value is neither null, a number, nor a numeric string.
    pub fn optional_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
        to_f64(Value::deserialize(de)?)
    }

    /// Deserializes an optional integer given either as a JSON number or a
    /// numeric string. Use with `#[serde(default)]`.
    ///
    /// # Errors
    ///
    /// Fails if the value is not an integer that fits in `u32`.
    pub fn optional_u32<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
        let Some(value) = to_f64::<D::Error>(Value::deserialize(de)?)? else {
            return Ok(None);
        };
        if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
            return Err(D::Error::custom(format!(
                "expected a non-negative integer, got {value}"
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(Some(value as u32))
    }
}
