//! Range-valued settings such as `"60-70"` or `"30"`

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Errors produced while parsing a range setting
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RangeError {
    /// One side of the range is not a number
    #[error("invalid range '{0}': expected a number or 'min-max'")]
    Malformed(String),

    /// Lower bound above upper bound
    #[error("invalid range '{0}': lower bound exceeds upper bound")]
    Inverted(String),

    /// Negative bound
    #[error("invalid range '{0}': bounds must not be negative")]
    Negative(String),
}

/// Inclusive numeric range drawn from uniformly
///
/// Written as `"min-max"` or as a single value meaning `min == max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanRange {
    pub min: f64,
    pub max: f64,
}

impl SpanRange {
    /// Create a range, checking bound order
    pub fn new(min: f64, max: f64) -> Result<Self, RangeError> {
        let text = format!("{min}-{max}");
        if !min.is_finite() || !max.is_finite() {
            return Err(RangeError::Malformed(text));
        }
        if min < 0.0 || max < 0.0 {
            return Err(RangeError::Negative(text));
        }
        if min > max {
            return Err(RangeError::Inverted(text));
        }
        Ok(Self { min, max })
    }

    /// Range holding a single value
    pub fn fixed(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// Draw a uniform value in `[min, max]`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.min >= self.max {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    /// Draw a uniform value and truncate it to a whole number
    pub fn sample_whole<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        self.sample(rng).trunc() as u64
    }

    /// Draw a whole number of seconds
    pub fn sample_secs<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(self.sample_whole(rng))
    }
}

impl FromStr for SpanRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| RangeError::Malformed(trimmed.to_string()))
        };

        let range = match trimmed.split_once('-') {
            Some((lo, hi)) => Self::new(parse(lo)?, parse(hi)?),
            None => Self::new(parse(trimmed)?, parse(trimmed)?),
        };

        range.map_err(|e| match e {
            RangeError::Inverted(_) => RangeError::Inverted(trimmed.to_string()),
            RangeError::Negative(_) => RangeError::Negative(trimmed.to_string()),
            RangeError::Malformed(_) => RangeError::Malformed(trimmed.to_string()),
        })
    }
}

impl fmt::Display for SpanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl Serialize for SpanRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => SpanRange::new(n, n).map_err(serde::de::Error::custom),
        }
    }
}
