//! Sample values and value conversion.
//!
//! Every conversion from a host state string into a number yields a
//! [`Sample`]: either a known finite value or [`Sample::Unknown`]. Failed
//! conversions are not errors, they only degrade that one field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::DsKind;

/// Host states that map to `1`.
const TRUE_STATES: [&str; 5] = ["on", "open", "home", "locked", "above_horizon"];

/// Host states that map to `0`.
const FALSE_STATES: [&str; 5] = ["off", "closed", "not_home", "unlocked", "below_horizon"];

/// A single value: known and finite, or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Sample {
    /// A finite value.
    Known(f64),
    /// No usable value.
    #[default]
    Unknown,
}

impl Sample {
    /// Parses a host state string.
    ///
    /// Decimal numbers are accepted when finite. Binary states such as
    /// `on`/`off` or `home`/`not_home` map to `1` and `0`, case-insensitively.
    /// Anything else is [`Sample::Unknown`].
    ///
    /// ```rust
    /// use rrdrec::sample::Sample;
    ///
    /// assert_eq!(Sample::parse("21.5"), Sample::Known(21.5));
    /// assert_eq!(Sample::parse("ON"), Sample::Known(1.0));
    /// assert_eq!(Sample::parse("unavailable"), Sample::Unknown);
    /// ```
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<f64>() {
            return Self::from_f64(value);
        }

        let lowered = raw.to_ascii_lowercase();
        if TRUE_STATES.contains(&lowered.as_str()) {
            Self::Known(1.0)
        } else if FALSE_STATES.contains(&lowered.as_str()) {
            Self::Known(0.0)
        } else {
            Self::Unknown
        }
    }

    /// Wraps a float, mapping NaN and infinities to [`Sample::Unknown`].
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Known(value)
        } else {
            Self::Unknown
        }
    }

    /// The on-disk representation; unknown is NaN.
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Known(value) => value,
            Self::Unknown => f64::NAN,
        }
    }

    /// Applies the input rules of a data source kind.
    ///
    /// Integer counters round to the nearest integer; every other kind
    /// passes the value through.
    #[must_use]
    pub fn for_kind(self, kind: DsKind) -> Self {
        match self {
            Self::Known(value) if kind.is_integer() => Self::Known(value.round()),
            other => other,
        }
    }

    /// Returns the value if known.
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }

    /// Whether this sample carries a value.
    pub fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<f64>> for Sample {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Unknown, Self::from_f64)
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => fmt::Display::fmt(value, f),
            Self::Unknown => f.write_str("U"),
        }
    }
}

/// One timestamped set of values for a database.
///
/// Data sources missing from `values` are written as unknown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplePoint {
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Values keyed by data source name.
    pub values: BTreeMap<String, Sample>,
}

impl SamplePoint {
    /// Creates an empty point at `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Adds a value, builder style.
    #[must_use]
    pub fn with(mut self, ds_name: &str, sample: Sample) -> Self {
        self.values.insert(ds_name.to_string(), sample);
        self
    }

    /// Sets a value.
    pub fn insert(&mut self, ds_name: &str, sample: Sample) {
        self.values.insert(ds_name.to_string(), sample);
    }

    /// Looks up a value; missing names are unknown.
    pub fn get(&self, ds_name: &str) -> Sample {
        self.values.get(ds_name).copied().unwrap_or_default()
    }
}
