//! Event-driven sampling.
//!
//! Each value-changed notification updates the bindings of its sensor.
//! A point is committed once every binding of the database has reported
//! at roughly the same time: the population standard deviation of their
//! last-seen timestamps must be within the tolerance. The point is stamped
//! with the newest of those timestamps.

use tracing::debug;

use super::{Bindings, Trigger, UpdateStrategy};
use crate::sample::{Sample, SamplePoint};

/// Default timestamp tolerance in seconds.
pub const DEFAULT_TOLERANCE: f64 = 1.0;

/// Commits when bound sensors have reported within `tolerance` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventDriven {
    tolerance: f64,
}

impl EventDriven {
    /// Creates the strategy with a tolerance in seconds.
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Returns the tolerance in seconds.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }
}

impl Default for EventDriven {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl UpdateStrategy for EventDriven {
    fn name(&self) -> &'static str {
        "event"
    }

    fn sample(&mut self, bindings: &mut Bindings, trigger: &Trigger) -> Option<SamplePoint> {
        let Trigger::ValueChanged {
            source_id,
            value,
            timestamp,
        } = trigger
        else {
            return None;
        };
        if !bindings.is_bound(source_id) {
            return None;
        }

        let sample = Sample::parse(value);
        if !sample.is_known() {
            debug!(source_id = %source_id, value = %value, "ignoring unparseable value");
            return None;
        }
        bindings.record(source_id, sample, *timestamp);

        let stdev = bindings.timestamp_stdev();
        if bindings.len() == 1 || stdev <= self.tolerance {
            return Some(bindings.to_point(bindings.latest_timestamp()));
        }

        debug!(
            source_id = %source_id,
            stdev,
            tolerance = self.tolerance,
            "deferring until other data sources update"
        );
        None
    }
}
