//! Recorder and graph configuration.
//!
//! Both are plain serde structs loaded from JSON. Durations accept either
//! a bare integer or a scaled literal such as `"5m"`.
//!
//! ```json
//! {
//!   "path": "rrd",
//!   "databases": [
//!     {
//!       "name": "climate",
//!       "step": "5m",
//!       "data_sources": [
//!         { "sensor": "sensor.outside", "name": "temp", "cf": "GAUGE", "heartbeat": "15m" }
//!       ],
//!       "round_robin_archives": [
//!         { "cf": "AVERAGE", "steps": 1, "rows": "1d" },
//!         { "cf": "MAX", "steps": "1h", "rows": "1y" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::duration::{DurationUnit, ScaledDuration};
use crate::error::{ConfigError, Result};
use crate::sampler::event::DEFAULT_TOLERANCE;
use crate::schema::{ArchiveTierDef, DataSourceDef, Database};

/// Default directory for database files.
pub const DEFAULT_PATH: &str = "rrd";

/// Smallest accepted graph width or height.
pub const MIN_IMAGE_SIZE: u32 = 120;

/// Largest accepted graph width or height.
pub const MAX_IMAGE_SIZE: u32 = 700;

/// How a database is sampled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Read every sensor at each step boundary.
    #[default]
    Polling,
    /// Commit when bound sensors report within the tolerance.
    Event,
}

/// Top-level recorder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Directory holding the `.rrd` files.
    #[serde(default = "default_path")]
    pub path: String,
    /// Timestamp tolerance of the event-driven strategy, in seconds.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Strategy for databases that do not set their own.
    #[serde(default)]
    pub strategy: Strategy,
    /// Databases to record.
    pub databases: Vec<DatabaseConfig>,
}

/// One database and its sensor bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database name.
    pub name: String,
    /// Step between primary data points.
    #[serde(default = "default_step")]
    pub step: ScaledDuration,
    /// Overrides the recorder-wide strategy.
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Data sources with the sensor feeding each.
    pub data_sources: Vec<DataSourceConfig>,
    /// Archives.
    pub round_robin_archives: Vec<ArchiveTierDef>,
}

/// A data source definition bound to a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Sensor identifier feeding the data source.
    pub sensor: String,
    /// The data source itself.
    #[serde(flatten)]
    pub source: DataSourceDef,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_step() -> ScaledDuration {
    ScaledDuration::Scaled {
        magnitude: 5,
        unit: DurationUnit::Minutes,
    }
}

impl RecorderConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON or
    /// [`ConfigError::Tolerance`] on a bad tolerance.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise
    /// as [`RecorderConfig::from_json_str`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks recorder-wide settings.
    ///
    /// Database definitions are validated one by one during setup so a
    /// bad database does not prevent the others from recording.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Tolerance`] if the tolerance is negative or
    /// not finite.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Tolerance(self.tolerance));
        }
        Ok(())
    }

    /// Strategy of `db`, falling back to the recorder-wide one.
    pub fn strategy_for(&self, db: &DatabaseConfig) -> Strategy {
        db.strategy.unwrap_or(self.strategy)
    }
}

impl DatabaseConfig {
    /// Resolves the configured definition into a [`Database`].
    ///
    /// # Errors
    ///
    /// Returns a schema error if the definition is invalid.
    pub fn database(&self) -> Result<Database> {
        let sources: Vec<DataSourceDef> = self
            .data_sources
            .iter()
            .map(|ds| ds.source.clone())
            .collect();
        Ok(Database::define(
            &self.name,
            self.step,
            &sources,
            &self.round_robin_archives,
        )?)
    }

    /// `(sensor, data source)` pairs in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.data_sources
            .iter()
            .map(|ds| (ds.sensor.as_str(), ds.source.name.as_str()))
    }
}

/// A graph of one `.rrd` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Graph name.
    pub name: String,
    /// Path of the `.rrd` file.
    #[serde(rename = "rrdfile")]
    pub rrd_file: String,
    /// Default image width.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Default image height.
    #[serde(default = "default_height")]
    pub height: u32,
    /// How far back the graph reaches.
    #[serde(default = "default_timerange")]
    pub timerange: ScaledDuration,
    /// Caller plot arguments in rrdgraph syntax.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra renderer options such as `--title`.
    #[serde(default, rename = "rrdgraph_options")]
    pub options: Vec<String>,
}

fn default_width() -> u32 {
    400
}

fn default_height() -> u32 {
    120
}

fn default_timerange() -> ScaledDuration {
    ScaledDuration::Scaled {
        magnitude: 1,
        unit: DurationUnit::Days,
    }
}

impl GraphConfig {
    /// Parses and validates a JSON graph configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed JSON or
    /// [`ConfigError::ImageSize`] on an out-of-range dimension.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the image dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ImageSize`] for the first bad dimension.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        check_image_size("width", self.width)?;
        check_image_size("height", self.height)
    }
}

pub(crate) fn check_image_size(field: &'static str, value: u32) -> std::result::Result<(), ConfigError> {
    if (MIN_IMAGE_SIZE..=MAX_IMAGE_SIZE).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ImageSize {
            field,
            value,
            min: MIN_IMAGE_SIZE,
            max: MAX_IMAGE_SIZE,
        })
    }
}
