//! Scaled-duration literals.
//!
//! Durations in database definitions follow the librrd grammar: a bare
//! positive integer, or a positive integer followed by a single unit
//! character. Bare integers are raw seconds for `step`/`heartbeat` and raw
//! counts for archive `steps`/`rows`.
//!
//! ```rust
//! use rrdrec::duration::ScaledDuration;
//!
//! let step: ScaledDuration = "5m".parse().unwrap();
//! assert_eq!(step.as_seconds().unwrap(), 300);
//! assert_eq!(step.to_string(), "5m");
//!
//! // "1d" of 5 minute steps is 288 rows
//! let rows: ScaledDuration = "1d".parse().unwrap();
//! assert_eq!(rows.resolve(300).unwrap(), 288);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DurationError;

/// Unit suffix of a scaled duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    /// `s`
    Seconds,
    /// `m`
    Minutes,
    /// `h`
    Hours,
    /// `d`
    Days,
    /// `w`
    Weeks,
    /// `M`, 31 days.
    Months,
    /// `y`, 366 days.
    Years,
}

impl DurationUnit {
    /// Maps a suffix character to its unit.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(Self::Seconds),
            'm' => Some(Self::Minutes),
            'h' => Some(Self::Hours),
            'd' => Some(Self::Days),
            'w' => Some(Self::Weeks),
            'M' => Some(Self::Months),
            'y' => Some(Self::Years),
            _ => None,
        }
    }

    /// Returns the suffix character.
    pub fn as_char(self) -> char {
        match self {
            Self::Seconds => 's',
            Self::Minutes => 'm',
            Self::Hours => 'h',
            Self::Days => 'd',
            Self::Weeks => 'w',
            Self::Months => 'M',
            Self::Years => 'y',
        }
    }

    /// Length of one unit in seconds.
    pub fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
            Self::Months => 2_678_400,
            Self::Years => 31_622_400,
        }
    }
}

/// A validated scaled-duration literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaledDuration {
    /// A bare positive integer.
    Raw(u64),
    /// A positive magnitude with a unit suffix.
    Scaled {
        /// The integer before the suffix.
        magnitude: u64,
        /// The suffix.
        unit: DurationUnit,
    },
}

impl ScaledDuration {
    /// Creates a duration of `n` raw seconds (or a raw count).
    ///
    /// # Errors
    ///
    /// Returns [`DurationError::NotPositive`] if `n` is zero.
    pub fn raw(n: u64) -> Result<Self, DurationError> {
        if n == 0 {
            return Err(DurationError::NotPositive {
                literal: n.to_string(),
            });
        }
        Ok(Self::Raw(n))
    }

    /// Interprets the literal as a number of seconds.
    ///
    /// # Errors
    ///
    /// Returns [`DurationError::Overflow`] if the seconds do not fit in a `u64`.
    pub fn as_seconds(&self) -> Result<u64, DurationError> {
        match *self {
            Self::Raw(n) => Ok(n),
            Self::Scaled { magnitude, unit } => {
                magnitude
                    .checked_mul(unit.seconds())
                    .ok_or_else(|| DurationError::Overflow {
                        literal: self.to_string(),
                    })
            }
        }
    }

    /// Interprets the literal as a count of `divisor`-second units.
    ///
    /// Bare integers are already counts and are returned unchanged. Scaled
    /// literals are converted to seconds and divided, which must be exact
    /// and non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`DurationError::NotAMultiple`] when the scaled duration is
    /// not a positive multiple of `divisor`.
    pub fn resolve(&self, divisor: u64) -> Result<u64, DurationError> {
        match self {
            Self::Raw(n) => Ok(*n),
            Self::Scaled { .. } => {
                let seconds = self.as_seconds()?;
                if divisor == 0 || seconds % divisor != 0 || seconds < divisor {
                    return Err(DurationError::NotAMultiple {
                        literal: self.to_string(),
                        divisor,
                    });
                }
                Ok(seconds / divisor)
            }
        }
    }
}

impl FromStr for ScaledDuration {
    type Err = DurationError;

    fn from_str(literal: &str) -> Result<Self, Self::Err> {
        let literal = literal.trim();
        let Some(last) = literal.chars().last() else {
            return Err(DurationError::Empty);
        };

        let (digits, unit) = if last.is_ascii_digit() {
            (literal, None)
        } else {
            let unit = DurationUnit::from_char(last).ok_or_else(|| DurationError::UnknownUnit {
                literal: literal.to_string(),
            })?;
            (&literal[..literal.len() - last.len_utf8()], Some(unit))
        };

        let magnitude: i64 = digits.parse().map_err(|_| DurationError::NotANumber {
            literal: literal.to_string(),
        })?;
        if magnitude <= 0 {
            return Err(DurationError::NotPositive {
                literal: literal.to_string(),
            });
        }
        let magnitude = magnitude.unsigned_abs();

        let duration = match unit {
            None => Self::Raw(magnitude),
            Some(unit) => Self::Scaled { magnitude, unit },
        };
        duration.as_seconds()?;
        Ok(duration)
    }
}

impl fmt::Display for ScaledDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(n) => write!(f, "{n}"),
            Self::Scaled { magnitude, unit } => write!(f, "{magnitude}{}", unit.as_char()),
        }
    }
}

impl Serialize for ScaledDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Raw(n) => serializer.serialize_u64(*n),
            Self::Scaled { .. } => serializer.collect_str(self),
        }
    }
}

impl<'de> Deserialize<'de> for ScaledDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ScaledDurationVisitor)
    }
}

/// Accepts either a JSON integer or a string literal.
struct ScaledDurationVisitor;

impl Visitor<'_> for ScaledDurationVisitor {
    type Value = ScaledDuration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a positive integer or a scaled duration such as \"5m\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        ScaledDuration::raw(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v <= 0 {
            return Err(E::custom(DurationError::NotPositive {
                literal: v.to_string(),
            }));
        }
        ScaledDuration::raw(v.unsigned_abs()).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.parse().map_err(E::custom)
    }
}
