//! Wall-clock polling.
//!
//! [`run`] drives one database: it sleeps until the next step boundary,
//! reads every bound sensor and commits one point stamped with the
//! boundary. The boundary is re-derived from the wall clock on every
//! iteration so delays never accumulate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Bindings, Sampler, SensorState, Trigger, UpdateStrategy};
use crate::sample::{Sample, SamplePoint};

/// Reads every bound sensor at each step boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Polling;

impl UpdateStrategy for Polling {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn sample(&mut self, bindings: &mut Bindings, trigger: &Trigger) -> Option<SamplePoint> {
        let Trigger::Boundary {
            timestamp,
            readings,
        } = trigger
        else {
            return None;
        };

        let sources: Vec<String> = bindings.source_ids().map(str::to_owned).collect();
        for source_id in &sources {
            let sample = readings
                .get(source_id)
                .and_then(Option::as_deref)
                .map_or(Sample::Unknown, Sample::parse);
            bindings.record(source_id, sample, *timestamp);
        }
        Some(bindings.to_point(*timestamp))
    }
}

/// The first multiple of `step` strictly after `now`.
///
/// A `now` exactly on a boundary advances to the following one.
pub fn next_boundary(now: u64, step: u64) -> u64 {
    let step = step.max(1);
    (now / step).saturating_add(1).saturating_mul(step)
}

/// Polls `sampler` at every step boundary until `token` is cancelled.
///
/// Returns the sampler so the caller can flush it.
pub async fn run(
    mut sampler: Sampler,
    sensors: Arc<dyn SensorState>,
    token: CancellationToken,
) -> Sampler {
    let step = sampler.database().step;
    let database = sampler.database().name.clone();
    let mut last_boundary: Option<u64> = None;
    info!(database = %database, step, "polling started");

    loop {
        if token.is_cancelled() {
            break;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut boundary = next_boundary(now.as_secs(), step);
        if let Some(last) = last_boundary {
            boundary = boundary.max(last.saturating_add(step));
        }
        let delay = Duration::from_secs(boundary).saturating_sub(now);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        if token.is_cancelled() {
            break;
        }

        let readings: HashMap<String, Option<String>> = sampler
            .bindings()
            .source_ids()
            .map(|id| (id.to_owned(), sensors.current_value(id)))
            .collect();
        let trigger = Trigger::Boundary {
            timestamp: boundary,
            readings,
        };
        if sampler.handle(&trigger).is_none() {
            debug!(database = %database, timestamp = boundary, "no point committed");
        }
        last_boundary = Some(boundary);
    }

    info!(database = %database, "polling stopped");
    sampler
}
