//! Sampling strategies: deciding when to write and what.
//!
//! A [`Sampler`] owns one database's [`Rrd`], the [`Bindings`] between host
//! sensors and its data sources, and an [`UpdateStrategy`]. Triggers are
//! either a value-changed notification from the host or a wall-clock step
//! boundary; the strategy turns a trigger into at most one [`SamplePoint`].
//!
//! Two strategies exist:
//!
//! - [`EventDriven`]: commits when the bound sensors have all reported
//!   within a timestamp tolerance of each other.
//! - [`Polling`]: reads every sensor at each step boundary.
//!
//! Storage failures are logged and the point is dropped. They never stop
//! the next trigger from being handled.

pub mod event;
pub mod polling;

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, error, warn};

use crate::sample::{Sample, SamplePoint};
use crate::schema::{Database, DsKind};
use crate::store::Rrd;

pub use event::EventDriven;
pub use polling::Polling;

/// Read access to the host's sensor states.
pub trait SensorState: Send + Sync {
    /// Returns the current state string of `source_id`, or `None` when the
    /// sensor is unavailable.
    fn current_value(&self, source_id: &str) -> Option<String>;
}

/// What woke a sampler.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The host reported a new state for a sensor.
    ValueChanged {
        /// Sensor identifier.
        source_id: String,
        /// Raw state string.
        value: String,
        /// When the state changed, Unix seconds.
        timestamp: u64,
    },
    /// A step boundary was reached.
    Boundary {
        /// The boundary, Unix seconds.
        timestamp: u64,
        /// State of every bound sensor at the boundary.
        readings: HashMap<String, Option<String>>,
    },
}

/// Turns triggers into sample points.
pub trait UpdateStrategy: Send + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Updates the bindings from `trigger` and returns a point to commit,
    /// if any.
    fn sample(&mut self, bindings: &mut Bindings, trigger: &Trigger) -> Option<SamplePoint>;
}

/// Cached state of one sensor feeding one data source.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBinding {
    /// Sensor identifier.
    pub source_id: String,
    /// Data source fed by the sensor.
    pub ds_name: String,
    /// Kind of the data source.
    pub kind: DsKind,
    /// When the sensor last reported; zero if never.
    pub last_seen_timestamp: u64,
    /// Last reported value.
    pub last_value: Sample,
}

/// All bindings of one database.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<EntityBinding>,
}

impl Bindings {
    /// Binds `(source_id, ds_name)` pairs to the data sources of `db`.
    ///
    /// Pairs naming an undeclared data source are skipped with a warning.
    pub fn new<I, S, D>(db: &Database, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .filter_map(|(source_id, ds_name)| {
                let source_id = source_id.into();
                let Some((_, ds)) = db.data_source(ds_name.as_ref()) else {
                    warn!(
                        database = %db.name,
                        source_id = %source_id,
                        data_source = ds_name.as_ref(),
                        "binding names an undeclared data source, ignoring"
                    );
                    return None;
                };
                Some(EntityBinding {
                    source_id,
                    ds_name: ds.name.clone(),
                    kind: ds.kind,
                    last_seen_timestamp: 0,
                    last_value: Sample::Unknown,
                })
            })
            .collect();
        Self { entries }
    }

    /// Returns the bindings in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityBinding> {
        self.entries.iter()
    }

    /// Returns the number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `source_id` feeds any data source.
    pub fn is_bound(&self, source_id: &str) -> bool {
        self.entries.iter().any(|b| b.source_id == source_id)
    }

    /// Returns every bound sensor identifier.
    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|b| b.source_id.as_str())
    }

    /// Records a value into every binding of `source_id`.
    ///
    /// Integer counters are rounded per their data source kind.
    pub fn record(&mut self, source_id: &str, sample: Sample, timestamp: u64) {
        for binding in self.entries.iter_mut().filter(|b| b.source_id == source_id) {
            binding.last_seen_timestamp = timestamp;
            binding.last_value = sample.for_kind(binding.kind);
        }
    }

    /// Population standard deviation of the last-seen timestamps.
    ///
    /// Bindings that never reported count as timestamp zero.
    pub fn timestamp_stdev(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let timestamps: Vec<f64> = self
            .entries
            .iter()
            .map(|b| b.last_seen_timestamp as f64)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let n = timestamps.len() as f64;
        let mean = timestamps.iter().sum::<f64>() / n;
        let variance = timestamps.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt()
    }

    /// The most recent last-seen timestamp.
    pub fn latest_timestamp(&self) -> u64 {
        self.entries
            .iter()
            .map(|b| b.last_seen_timestamp)
            .max()
            .unwrap_or(0)
    }

    /// Builds a point from the cached values.
    pub fn to_point(&self, timestamp: u64) -> SamplePoint {
        self.entries
            .iter()
            .fold(SamplePoint::new(timestamp), |point, b| {
                point.with(&b.ds_name, b.last_value)
            })
    }
}

/// One database's writer: storage handle, bindings and strategy.
#[derive(Debug)]
pub struct Sampler {
    rrd: Rrd,
    bindings: Bindings,
    strategy: Box<dyn UpdateStrategy>,
}

impl Sampler {
    /// Creates a sampler.
    pub fn new(rrd: Rrd, bindings: Bindings, strategy: Box<dyn UpdateStrategy>) -> Self {
        Self {
            rrd,
            bindings,
            strategy,
        }
    }

    /// Returns the database definition.
    pub fn database(&self) -> &Database {
        self.rrd.database()
    }

    /// Returns the storage handle.
    pub fn rrd(&self) -> &Rrd {
        &self.rrd
    }

    /// Returns the bindings.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Returns the strategy name.
    pub fn strategy(&self) -> &'static str {
        self.strategy.name()
    }

    /// Handles one trigger, committing at most one point.
    ///
    /// Returns the committed timestamp. A failed commit is logged and the
    /// point is dropped.
    pub fn handle(&mut self, trigger: &Trigger) -> Option<u64> {
        let point = self.strategy.sample(&mut self.bindings, trigger)?;
        let timestamp = point.timestamp;

        match self.rrd.update(&point) {
            Ok(()) => {
                debug!(
                    database = %self.rrd.database().name,
                    timestamp,
                    values = ?point.values,
                    "committed sample point"
                );
                Some(timestamp)
            }
            Err(e) => {
                error!(
                    database = %self.rrd.database().name,
                    timestamp,
                    error = %e,
                    "dropping sample point"
                );
                None
            }
        }
    }

    /// Consumes the sampler, returning its storage handle.
    pub fn into_rrd(self) -> Rrd {
        self.rrd
    }
}
