//! Database schema types: data sources, round robin archives, step.
//!
//! A [`Database`] is defined once from configuration-level definitions
//! ([`DataSourceDef`], [`ArchiveTierDef`]) whose durations are still
//! scaled-duration literals. [`Database::define`] resolves every literal
//! against the step and validates the result; the resolved `Database` is
//! what the storage engine and samplers work with.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::duration::ScaledDuration;
use crate::error::{DurationError, SchemaError};

/// Longest data source name the file format can hold.
pub const MAX_DS_NAME_LEN: usize = 19;

/// Default xff for archives that do not declare one.
pub const DEFAULT_XFF: f64 = 0.5;

/// How raw input values of a data source are turned into rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DsKind {
    /// The value is stored as-is (temperatures, levels).
    Gauge,
    /// Ever-increasing integer counter; a decrease is unknown.
    Counter,
    /// Integer counter that may be reset; stored as a rate.
    Derive,
    /// Floating point counter; a decrease is unknown.
    #[serde(rename = "DCOUNTER")]
    DCounter,
    /// Floating point derive; negative rates are allowed.
    #[serde(rename = "DDERIVE")]
    DDerive,
    /// Counter that resets on every read; value divided by the interval.
    Absolute,
}

impl DsKind {
    /// Whether raw inputs are rounded to integers before use.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Counter | Self::Derive)
    }

    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Gauge => 0,
            Self::Counter => 1,
            Self::Derive => 2,
            Self::DCounter => 3,
            Self::DDerive => 4,
            Self::Absolute => 5,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Gauge),
            1 => Some(Self::Counter),
            2 => Some(Self::Derive),
            3 => Some(Self::DCounter),
            4 => Some(Self::DDerive),
            5 => Some(Self::Absolute),
            _ => None,
        }
    }

    /// The upper-case keyword used in configuration and graph arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "GAUGE",
            Self::Counter => "COUNTER",
            Self::Derive => "DERIVE",
            Self::DCounter => "DCOUNTER",
            Self::DDerive => "DDERIVE",
            Self::Absolute => "ABSOLUTE",
        }
    }
}

impl fmt::Display for DsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reduction applied to a window of primary data points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsolidationFn {
    /// Mean of the known values.
    Average,
    /// Smallest known value.
    Min,
    /// Largest known value.
    Max,
    /// Most recent known value.
    Last,
}

impl ConsolidationFn {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Self::Average => 0,
            Self::Min => 1,
            Self::Max => 2,
            Self::Last => 3,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Average),
            1 => Some(Self::Min),
            2 => Some(Self::Max),
            3 => Some(Self::Last),
            _ => None,
        }
    }

    /// The upper-case keyword used in configuration and graph arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for ConsolidationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsolidationFn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            other => Err(format!("unknown consolidation function '{other}'")),
        }
    }
}

/// Unresolved data source definition, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceDef {
    /// Data source name.
    pub name: String,
    /// Input type.
    #[serde(rename = "cf")]
    pub kind: DsKind,
    /// Longest gap between updates before the interval is unknown.
    pub heartbeat: ScaledDuration,
    /// Smallest accepted rate.
    #[serde(default)]
    pub min: Option<f64>,
    /// Largest accepted rate.
    #[serde(default)]
    pub max: Option<f64>,
}

/// Unresolved archive definition, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTierDef {
    /// Consolidation function.
    pub cf: ConsolidationFn,
    /// Tolerated unknown fraction.
    #[serde(default = "default_xff")]
    pub xff: f64,
    /// Primary data points per row (count, or a duration divided by step).
    pub steps: ScaledDuration,
    /// Rows kept (count, or a duration divided by the row length).
    pub rows: ScaledDuration,
}

fn default_xff() -> f64 {
    DEFAULT_XFF
}

/// One named numeric input stream of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    /// Name, unique within the database.
    pub name: String,
    /// Input type.
    pub kind: DsKind,
    /// Heartbeat in seconds.
    pub heartbeat: u64,
    /// Smallest accepted rate, `None` when unbounded.
    pub min: Option<f64>,
    /// Largest accepted rate, `None` when unbounded.
    pub max: Option<f64>,
}

impl DataSource {
    /// Whether `rate` lies within the declared bounds.
    pub fn in_range(&self, rate: f64) -> bool {
        self.min.is_none_or(|min| rate >= min) && self.max.is_none_or(|max| rate <= max)
    }
}

/// One retention/resolution policy of a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTier {
    /// Consolidation function.
    pub cf: ConsolidationFn,
    /// Tolerated unknown fraction in `[0, 1]`.
    pub xff: f64,
    /// Primary data points consolidated into one row.
    pub steps_per_row: u64,
    /// Number of rows in the ring.
    pub row_count: u64,
}

impl ArchiveTier {
    /// Seconds covered by one row.
    ///
    /// Validated definitions never saturate here.
    pub fn row_length(&self, step: u64) -> u64 {
        self.steps_per_row.saturating_mul(step)
    }
}

/// A validated round robin database definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Database {
    /// Database name; the backing file is `<name>.rrd`.
    pub name: String,
    /// Step in seconds.
    pub step: u64,
    /// Data sources in declaration order.
    pub data_sources: Vec<DataSource>,
    /// Archives in declaration order.
    pub archive_tiers: Vec<ArchiveTier>,
}

impl Database {
    /// Resolves and validates a database definition.
    ///
    /// Heartbeats are converted to seconds, archive `steps` are divided by
    /// the step and archive `rows` by the row length.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if a name is invalid or duplicated, a
    /// duration cannot be resolved, or an xff lies outside `[0, 1]`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rrdrec::schema::{ArchiveTierDef, ConsolidationFn, DataSourceDef, Database, DsKind};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::define(
    ///     "climate",
    ///     "5m".parse()?,
    ///     &[DataSourceDef {
    ///         name: "temp".to_string(),
    ///         kind: DsKind::Gauge,
    ///         heartbeat: "10m".parse()?,
    ///         min: None,
    ///         max: None,
    ///     }],
    ///     &[ArchiveTierDef {
    ///         cf: ConsolidationFn::Average,
    ///         xff: 0.5,
    ///         steps: "1h".parse()?,
    ///         rows: "1w".parse()?,
    ///     }],
    /// )?;
    /// assert_eq!(db.step, 300);
    /// assert_eq!(db.archive_tiers[0].steps_per_row, 12);
    /// assert_eq!(db.archive_tiers[0].row_count, 168);
    /// # Ok(())
    /// # }
    /// ```
    pub fn define(
        name: &str,
        step: ScaledDuration,
        data_sources: &[DataSourceDef],
        archive_tiers: &[ArchiveTierDef],
    ) -> Result<Self, SchemaError> {
        let step = step.as_seconds().map_err(|e| duration_error("step", e))?;

        let data_sources = data_sources
            .iter()
            .map(|def| {
                let heartbeat = def
                    .heartbeat
                    .as_seconds()
                    .map_err(|e| duration_error(&format!("data source '{}' heartbeat", def.name), e))?;
                Ok(DataSource {
                    name: def.name.clone(),
                    kind: def.kind,
                    heartbeat,
                    min: def.min,
                    max: def.max,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let archive_tiers = archive_tiers
            .iter()
            .enumerate()
            .map(|(index, def)| {
                let steps_per_row = def
                    .steps
                    .resolve(step)
                    .map_err(|e| duration_error(&format!("archive {index} steps"), e))?;
                let row_length = step.checked_mul(steps_per_row).ok_or(
                    SchemaError::RowLengthOverflow {
                        index,
                        steps_per_row,
                        step,
                    },
                )?;
                let row_count = def
                    .rows
                    .resolve(row_length)
                    .map_err(|e| duration_error(&format!("archive {index} rows"), e))?;
                Ok(ArchiveTier {
                    cf: def.cf,
                    xff: def.xff,
                    steps_per_row,
                    row_count,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        Self::new(name, step, data_sources, archive_tiers)
    }

    /// Builds a database from already resolved parts.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn new(
        name: &str,
        step: u64,
        data_sources: Vec<DataSource>,
        archive_tiers: Vec<ArchiveTier>,
    ) -> Result<Self, SchemaError> {
        let db = Self {
            name: name.to_string(),
            step,
            data_sources,
            archive_tiers,
        };
        db.validate()?;
        Ok(db)
    }

    /// Validates names, ranges and counts.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn validate(&self) -> Result<(), SchemaError> {
        validate_database_name(&self.name)?;

        if self.step == 0 {
            return Err(duration_error(
                "step",
                DurationError::NotPositive {
                    literal: "0".to_string(),
                },
            ));
        }

        if self.data_sources.is_empty() {
            return Err(SchemaError::NoDataSources);
        }
        if self.archive_tiers.is_empty() {
            return Err(SchemaError::NoArchives);
        }

        let mut seen = HashSet::new();
        for ds in &self.data_sources {
            validate_ds_name(&ds.name)?;
            if !seen.insert(ds.name.as_str()) {
                return Err(SchemaError::DuplicateDataSource {
                    name: ds.name.clone(),
                });
            }
            if ds.heartbeat == 0 {
                return Err(duration_error(
                    &format!("data source '{}' heartbeat", ds.name),
                    DurationError::NotPositive {
                        literal: "0".to_string(),
                    },
                ));
            }
            if let (Some(min), Some(max)) = (ds.min, ds.max)
                && min > max
            {
                return Err(SchemaError::InvalidRange {
                    name: ds.name.clone(),
                    min,
                    max,
                });
            }
        }

        for (index, rra) in self.archive_tiers.iter().enumerate() {
            if !(0.0..=1.0).contains(&rra.xff) {
                return Err(SchemaError::InvalidXff {
                    index,
                    xff: rra.xff,
                });
            }
            if rra.steps_per_row == 0 {
                return Err(duration_error(
                    &format!("archive {index} steps"),
                    DurationError::NotPositive {
                        literal: "0".to_string(),
                    },
                ));
            }
            if rra.steps_per_row.checked_mul(self.step).is_none() {
                return Err(SchemaError::RowLengthOverflow {
                    index,
                    steps_per_row: rra.steps_per_row,
                    step: self.step,
                });
            }
            if rra.row_count == 0 {
                return Err(duration_error(
                    &format!("archive {index} rows"),
                    DurationError::NotPositive {
                        literal: "0".to_string(),
                    },
                ));
            }
        }

        Ok(())
    }

    /// Looks up a data source by name, returning its index.
    pub fn data_source(&self, name: &str) -> Option<(usize, &DataSource)> {
        self.data_sources
            .iter()
            .enumerate()
            .find(|(_, ds)| ds.name == name)
    }

    /// File name of the backing store.
    pub fn file_name(&self) -> String {
        format!("{}.rrd", self.name)
    }
}

fn duration_error(field: &str, source: DurationError) -> SchemaError {
    SchemaError::Duration {
        field: field.to_string(),
        source,
    }
}

fn validate_database_name(name: &str) -> Result<(), SchemaError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name is a relative path component")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SchemaError::InvalidDatabaseName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn validate_ds_name(name: &str) -> Result<(), SchemaError> {
    let reason = if name.is_empty() {
        Some("name is empty".to_string())
    } else if name.len() > MAX_DS_NAME_LEN {
        Some(format!("longer than {MAX_DS_NAME_LEN} characters"))
    } else if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some("only [A-Za-z0-9_] are allowed".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(SchemaError::InvalidDataSourceName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge(name: &str) -> DataSourceDef {
        DataSourceDef {
            name: name.to_string(),
            kind: DsKind::Gauge,
            heartbeat: "10m".parse().unwrap(),
            min: None,
            max: None,
        }
    }

    fn average(steps: &str, rows: &str) -> ArchiveTierDef {
        ArchiveTierDef {
            cf: ConsolidationFn::Average,
            xff: DEFAULT_XFF,
            steps: steps.parse().unwrap(),
            rows: rows.parse().unwrap(),
        }
    }

    #[test]
    fn test_define_resolves_durations() {
        let db = Database::define(
            "house",
            "5m".parse().unwrap(),
            &[gauge("temp"), gauge("humidity")],
            &[average("1", "1d"), average("1h", "1M")],
        )
        .unwrap();

        assert_eq!(db.step, 300);
        assert_eq!(db.data_sources[0].heartbeat, 600);
        assert_eq!(db.archive_tiers[0].steps_per_row, 1);
        assert_eq!(db.archive_tiers[0].row_count, 288);
        assert_eq!(db.archive_tiers[1].steps_per_row, 12);
        assert_eq!(db.archive_tiers[1].row_count, 744);
        assert_eq!(db.file_name(), "house.rrd");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = Database::define(
            "house",
            "5m".parse().unwrap(),
            &[gauge("temp"), gauge("temp")],
            &[average("1", "10")],
        );
        assert!(matches!(
            result,
            Err(SchemaError::DuplicateDataSource { ref name }) if name == "temp"
        ));
    }

    #[test]
    fn test_xff_out_of_range_rejected() {
        let mut rra = average("1", "10");
        rra.xff = 1.5;
        let result = Database::define("house", "5m".parse().unwrap(), &[gauge("temp")], &[rra]);
        assert!(matches!(result, Err(SchemaError::InvalidXff { index: 0, .. })));

        let mut rra = average("1", "10");
        rra.xff = f64::NAN;
        let result = Database::define("house", "5m".parse().unwrap(), &[gauge("temp")], &[rra]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unresolvable_duration_rejected() {
        // 7 minutes is not a multiple of the 5 minute step
        let result = Database::define(
            "house",
            "5m".parse().unwrap(),
            &[gauge("temp")],
            &[average("7m", "10")],
        );
        assert!(matches!(result, Err(SchemaError::Duration { .. })));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let rras = [average("1", "10")];
        let step: ScaledDuration = "1m".parse().unwrap();

        assert!(Database::define("", step, &[gauge("temp")], &rras).is_err());
        assert!(Database::define("../etc", step, &[gauge("temp")], &rras).is_err());
        assert!(Database::define("house", step, &[gauge("bad-name")], &rras).is_err());
        assert!(Database::define("house", step, &[gauge("a_very_long_ds_name_x")], &rras).is_err());
        assert!(Database::define("house", step, &[], &rras).is_err());
        assert!(Database::define("house", step, &[gauge("temp")], &[]).is_err());
    }

    #[test]
    fn test_row_length_overflow() {
        let result = Database::define(
            "house",
            "5m".parse().unwrap(),
            &[gauge("temp")],
            &[average("100000000000000000", "10")],
        );
        assert!(matches!(
            result,
            Err(SchemaError::RowLengthOverflow { index: 0, .. })
        ));

        let tier = ArchiveTier {
            cf: ConsolidationFn::Max,
            xff: DEFAULT_XFF,
            steps_per_row: u64::MAX / 2,
            row_count: 10,
        };
        let result = Database::new(
            "house",
            300,
            vec![DataSource {
                name: "temp".to_string(),
                kind: DsKind::Gauge,
                heartbeat: 600,
                min: None,
                max: None,
            }],
            vec![tier],
        );
        assert!(matches!(
            result,
            Err(SchemaError::RowLengthOverflow { index: 0, .. })
        ));
    }

    #[test]
    fn test_min_max_range() {
        let mut ds = gauge("temp");
        ds.min = Some(10.0);
        ds.max = Some(0.0);
        let result = Database::define("house", "1m".parse().unwrap(), &[ds], &[average("1", "10")]);
        assert!(matches!(result, Err(SchemaError::InvalidRange { .. })));

        let source = DataSource {
            name: "temp".to_string(),
            kind: DsKind::Gauge,
            heartbeat: 60,
            min: Some(-40.0),
            max: None,
        };
        assert!(source.in_range(-40.0));
        assert!(source.in_range(1e9));
        assert!(!source.in_range(-41.0));
    }

    #[test]
    fn test_definitions_deserialize_from_config_keys() {
        let ds: DataSourceDef = serde_json::from_str(
            r#"{"name": "power", "cf": "DERIVE", "heartbeat": 600, "min": 0}"#,
        )
        .unwrap();
        assert_eq!(ds.kind, DsKind::Derive);
        assert_eq!(ds.heartbeat, ScaledDuration::Raw(600));
        assert_eq!(ds.min, Some(0.0));
        assert_eq!(ds.max, None);

        let rra: ArchiveTierDef =
            serde_json::from_str(r#"{"cf": "MAX", "steps": "1h", "rows": "1y"}"#).unwrap();
        assert_eq!(rra.cf, ConsolidationFn::Max);
        assert!((rra.xff - DEFAULT_XFF).abs() < f64::EPSILON);
    }

    #[test]
    fn test_kind_and_cf_bytes_round_trip() {
        for kind in [
            DsKind::Gauge,
            DsKind::Counter,
            DsKind::Derive,
            DsKind::DCounter,
            DsKind::DDerive,
            DsKind::Absolute,
        ] {
            assert_eq!(DsKind::from_byte(kind.to_byte()), Some(kind));
        }
        for cf in [
            ConsolidationFn::Average,
            ConsolidationFn::Min,
            ConsolidationFn::Max,
            ConsolidationFn::Last,
        ] {
            assert_eq!(ConsolidationFn::from_byte(cf.to_byte()), Some(cf));
            assert_eq!(cf.as_str().parse::<ConsolidationFn>(), Ok(cf));
        }
        assert_eq!(DsKind::from_byte(42), None);
    }
}
