//! Constraint types for each kind of choice.
//!
//! Constraints are validated once, when a draw is requested. A malformed
//! constraint is an [`InvalidArgument`] and aborts the run immediately.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::floats::{sign_aware_lte, FloatWidth};
use super::intervals::IntervalSet;

/// Malformed configuration or draw constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid argument: {0}")]
pub struct InvalidArgument(pub String);

impl InvalidArgument {
    pub fn new(message: impl Into<String>) -> Self {
        InvalidArgument(message.into())
    }
}

/// Upper bound on collection sizes when no explicit maximum is given.
pub const COLLECTION_DEFAULT_MAX_SIZE: usize = 8 * 1024;

fn check_probability(p: f64, what: &str) -> Result<(), InvalidArgument> {
    if p.is_nan() || !(0.0..=1.0).contains(&p) {
        return Err(InvalidArgument::new(format!("{} must be a probability in [0, 1], got {}", what, p)));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegerConstraints {
    pub min_value: Option<i128>,
    pub max_value: Option<i128>,
    /// Value the shrinker moves towards. Clamped into `[min_value, max_value]`.
    pub shrink_towards: i128,
    /// Optional explicit probabilities for specific values. The remaining
    /// mass is spread over the rest of the range.
    pub weights: Option<Vec<(i128, f64)>>,
}

impl IntegerConstraints {
    pub fn new(min_value: Option<i128>, max_value: Option<i128>) -> Self {
        IntegerConstraints { min_value, max_value, shrink_towards: 0, weights: None }
    }

    pub fn bounded(min_value: i128, max_value: i128) -> Self {
        Self::new(Some(min_value), Some(max_value))
    }

    pub fn with_shrink_towards(mut self, shrink_towards: i128) -> Self {
        self.shrink_towards = shrink_towards;
        self
    }

    pub fn with_weights(mut self, weights: Vec<(i128, f64)>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// `shrink_towards` clamped into the permitted range.
    pub fn shrink_target(&self) -> i128 {
        let mut target = self.shrink_towards;
        if let Some(min) = self.min_value {
            target = target.max(min);
        }
        if let Some(max) = self.max_value {
            target = target.min(max);
        }
        target
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if let (Some(min), Some(max)) = (self.min_value, self.max_value) {
            if min > max {
                return Err(InvalidArgument::new(format!("min_value={} > max_value={}", min, max)));
            }
        }
        if let Some(weights) = &self.weights {
            if self.min_value.is_none() || self.max_value.is_none() {
                return Err(InvalidArgument::new("weights require both bounds to be set"));
            }
            let mut total = 0.0;
            for &(value, p) in weights {
                check_probability(p, "integer weight")?;
                if !self.permits(value) {
                    return Err(InvalidArgument::new(format!("weighted value {} outside bounds", value)));
                }
                total += p;
            }
            if total > 1.0 + 1e-9 {
                return Err(InvalidArgument::new(format!("integer weights sum to {} > 1", total)));
            }
        }
        Ok(())
    }

    pub fn permits(&self, value: i128) -> bool {
        self.min_value.map_or(true, |min| value >= min) && self.max_value.map_or(true, |max| value <= max)
    }
}

impl Default for IntegerConstraints {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanConstraints {
    /// Probability of drawing `true`.
    pub p: f64,
}

impl BooleanConstraints {
    pub fn new(p: f64) -> Self {
        BooleanConstraints { p }
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        check_probability(self.p, "p")
    }
}

impl Default for BooleanConstraints {
    fn default() -> Self {
        BooleanConstraints { p: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatConstraints {
    pub min_value: f64,
    pub max_value: f64,
    pub allow_nan: bool,
    /// Non-zero values must have at least this magnitude.
    pub smallest_nonzero_magnitude: f64,
    pub width: FloatWidth,
}

impl FloatConstraints {
    pub fn new(min_value: f64, max_value: f64) -> Self {
        FloatConstraints { min_value, max_value, allow_nan: false, ..Self::default() }
    }

    pub fn with_nan(mut self, allow_nan: bool) -> Self {
        self.allow_nan = allow_nan;
        self
    }

    pub fn with_width(mut self, width: FloatWidth) -> Self {
        self.width = width;
        self
    }

    pub fn with_smallest_nonzero_magnitude(mut self, magnitude: f64) -> Self {
        self.smallest_nonzero_magnitude = magnitude;
        self
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.min_value.is_nan() || self.max_value.is_nan() {
            return Err(InvalidArgument::new("float bounds must not be NaN"));
        }
        if !sign_aware_lte(self.min_value, self.max_value) {
            return Err(InvalidArgument::new(format!(
                "min_value={} > max_value={}",
                self.min_value, self.max_value
            )));
        }
        if !(self.smallest_nonzero_magnitude > 0.0) {
            return Err(InvalidArgument::new(format!(
                "smallest_nonzero_magnitude must be positive, got {}",
                self.smallest_nonzero_magnitude
            )));
        }
        Ok(())
    }

    pub fn permits(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.allow_nan;
        }
        if !(sign_aware_lte(self.min_value, value) && sign_aware_lte(value, self.max_value)) {
            return false;
        }
        if value != 0.0 && value.abs() < self.smallest_nonzero_magnitude {
            return false;
        }
        self.width.is_representable(value)
    }
}

impl Default for FloatConstraints {
    fn default() -> Self {
        FloatConstraints {
            min_value: f64::NEG_INFINITY,
            max_value: f64::INFINITY,
            allow_nan: true,
            smallest_nonzero_magnitude: f64::from_bits(1),
            width: FloatWidth::Width64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytesConstraints {
    pub min_size: usize,
    pub max_size: usize,
}

impl BytesConstraints {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        BytesConstraints { min_size, max_size }
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.min_size > self.max_size {
            return Err(InvalidArgument::new(format!(
                "min_size={} > max_size={}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

impl Default for BytesConstraints {
    fn default() -> Self {
        BytesConstraints { min_size: 0, max_size: COLLECTION_DEFAULT_MAX_SIZE }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringConstraints {
    pub intervals: IntervalSet,
    pub min_size: usize,
    pub max_size: usize,
}

impl StringConstraints {
    pub fn new(intervals: IntervalSet, min_size: usize, max_size: usize) -> Self {
        StringConstraints { intervals, min_size, max_size }
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.min_size > self.max_size {
            return Err(InvalidArgument::new(format!(
                "min_size={} > max_size={}",
                self.min_size, self.max_size
            )));
        }
        if self.intervals.is_empty() && self.min_size > 0 {
            return Err(InvalidArgument::new("cannot draw a non-empty string from an empty alphabet"));
        }
        Ok(())
    }
}

impl Default for StringConstraints {
    fn default() -> Self {
        StringConstraints {
            intervals: IntervalSet::full(),
            min_size: 0,
            max_size: COLLECTION_DEFAULT_MAX_SIZE,
        }
    }
}

/// Pick one of `n` alternatives, optionally with explicit weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConstraints {
    pub n: u64,
    pub weights: Option<Vec<f64>>,
}

impl IndexConstraints {
    pub fn new(n: u64) -> Self {
        IndexConstraints { n, weights: None }
    }

    pub fn weighted(weights: Vec<f64>) -> Self {
        IndexConstraints { n: weights.len() as u64, weights: Some(weights) }
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.n == 0 {
            return Err(InvalidArgument::new("cannot choose from zero alternatives"));
        }
        if let Some(weights) = &self.weights {
            if weights.len() as u64 != self.n {
                return Err(InvalidArgument::new(format!(
                    "{} weights given for {} alternatives",
                    weights.len(),
                    self.n
                )));
            }
            for &w in weights {
                if w.is_nan() || w < 0.0 || w.is_infinite() {
                    return Err(InvalidArgument::new(format!("invalid weight {}", w)));
                }
            }
            if weights.iter().sum::<f64>() <= 0.0 {
                return Err(InvalidArgument::new("weights must not all be zero"));
            }
        }
        Ok(())
    }
}
