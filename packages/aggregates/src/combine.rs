//! Building blocks for weighted spatial aggregation.

/// Rounds `value` to `decimals` decimal places.
///
/// Values too large to scale are returned unchanged; they carry no
/// fractional digits at that magnitude anyway.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let scaled = value * factor;
    if scaled.is_finite() {
        scaled.round() / factor
    } else {
        value
    }
}

/// Weighted mean of one field, tracking its own coverage.
///
/// Fields are accumulated independently so a geo code missing an optional
/// field only drops out of that field.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct WeightedMean {
    sum: f64,
    weight: f64,
}

impl WeightedMean {
    /// Adds `value` with `weight`. Missing or non-finite values and
    /// non-positive weights are ignored. Returns whether the value
    /// contributed.
    pub fn add(&mut self, value: Option<f64>, weight: f64) -> bool {
        match value {
            Some(v) if v.is_finite() && weight > 0.0 => {
                self.sum += v * weight;
                self.weight += weight;
                true
            }
            _ => false,
        }
    }

    /// Total weight that contributed to this field.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// The weighted mean, or `None` if no positive weight contributed.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }
}

/// Unweighted minimum or maximum across contributors.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Extent {
    min: Option<f64>,
    max: Option<f64>,
}

impl Extent {
    /// Folds `value` into the extent. Missing or non-finite values are
    /// ignored.
    pub fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    /// Smallest value seen.
    #[must_use]
    pub const fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest value seen.
    #[must_use]
    pub const fn max(&self) -> Option<f64> {
        self.max
    }
}

/// Keeps the first value seen for a provenance field and reports
/// disagreements.
#[derive(Debug, Clone)]
pub struct FirstSeen {
    field: &'static str,
    value: Option<String>,
    conflicted: bool,
}

impl FirstSeen {
    /// Creates a tracker for the named field.
    #[must_use]
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            value: None,
            conflicted: false,
        }
    }

    /// Offers a value. The first one wins; the first disagreement is
    /// logged as a warning under `log_target`.
    pub fn offer(&mut self, value: Option<&str>, geo_code: &str, log_target: &str) {
        let Some(value) = value else {
            return;
        };

        match &self.value {
            None => self.value = Some(value.to_string()),
            Some(kept) if kept != value && !self.conflicted => {
                self.conflicted = true;
                log::warn!(
                    target: log_target,
                    "Conflicting {} across geo codes: keeping '{kept}', ignoring '{value}' from {geo_code}",
                    self.field,
                );
            }
            Some(_) => {}
        }
    }

    /// Whether any offered value disagreed with the kept one.
    #[must_use]
    pub const fn conflicted(&self) -> bool {
        self.conflicted
    }

    /// The kept value.
    #[must_use]
    pub fn into_value(self) -> Option<String> {
        self.value
    }
}
