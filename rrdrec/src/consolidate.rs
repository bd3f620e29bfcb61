//! Primary and consolidated data point computation.
//!
//! An update turns each raw input into a rate covering `(last_update, t]`,
//! integrates that rate time-weighted into step-aligned primary data points
//! (PDPs), and folds every closed PDP into the consolidation state of each
//! archive. Archive windows close at absolute multiples of
//! `steps_per_row * step`.
//!
//! Everything here is pure: [`PendingUpdate::stage`] reads the current
//! preparation state and returns the new state plus the rows to write,
//! without touching the file. The store applies it afterwards.
//!
//! # Flow
//!
//! ```text
//! raw value ─► rate ─► PDP (per step) ─► CDP (per archive window) ─► row
//! ```

use crate::error::UpdateError;
use crate::sample::{Sample, SamplePoint};
use crate::schema::{ArchiveTier, ConsolidationFn, DataSource, Database, DsKind};

/// Per data source state of the PDP currently being built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdpPrep {
    /// Last raw input, NaN when there is none (counters need it).
    pub last_raw: f64,
    /// Sum of `rate * seconds` over the known part of the current step.
    pub value: f64,
    /// Seconds of the current step without a known rate.
    pub unknown_seconds: u64,
}

impl PdpPrep {
    /// State for a fresh data source whose first update follows `start`.
    ///
    /// Seconds of the step before `start` count as unknown.
    pub fn starting_at(start: u64, step: u64) -> Self {
        Self {
            last_raw: f64::NAN,
            value: 0.0,
            unknown_seconds: start % step,
        }
    }

    fn add(&mut self, rate: Sample, seconds: u64) {
        match rate {
            #[allow(clippy::cast_precision_loss)] // seconds are far below 2^52
            Sample::Known(rate) => self.value += rate * seconds as f64,
            Sample::Unknown => self.unknown_seconds += seconds,
        }
    }

    /// Closes the step: average of the known seconds.
    fn close(&self, step: u64, heartbeat: u64) -> Sample {
        let known_seconds = step.saturating_sub(self.unknown_seconds);
        if known_seconds == 0 || self.unknown_seconds > heartbeat {
            return Sample::Unknown;
        }
        #[allow(clippy::cast_precision_loss)]
        let known_seconds = known_seconds as f64;
        Sample::from_f64(self.value / known_seconds)
    }
}

/// Per archive and data source state of the row currently being built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdpPrep {
    /// Running sum (AVERAGE), extremum (MIN/MAX) or latest value (LAST).
    /// NaN while no known PDP has arrived.
    pub value: f64,
    /// Known PDPs in the current window.
    pub known: u64,
}

impl Default for CdpPrep {
    fn default() -> Self {
        Self {
            value: f64::NAN,
            known: 0,
        }
    }
}

impl CdpPrep {
    fn accumulate(&mut self, cf: ConsolidationFn, pdp: Sample) {
        let Sample::Known(v) = pdp else {
            return;
        };
        self.value = if self.known == 0 {
            v
        } else {
            match cf {
                ConsolidationFn::Average => self.value + v,
                ConsolidationFn::Min => self.value.min(v),
                ConsolidationFn::Max => self.value.max(v),
                ConsolidationFn::Last => v,
            }
        };
        self.known += 1;
    }

    /// Closes the window and resets the state.
    fn close(&mut self, tier: &ArchiveTier) -> Sample {
        let known = self.known;
        let value = self.value;
        *self = Self::default();

        let unknown = tier.steps_per_row.saturating_sub(known);
        #[allow(clippy::cast_precision_loss)]
        let unknown_fraction = unknown as f64 / tier.steps_per_row as f64;
        if known == 0 || unknown_fraction > tier.xff {
            return Sample::Unknown;
        }

        match tier.cf {
            #[allow(clippy::cast_precision_loss)]
            ConsolidationFn::Average => Sample::from_f64(value / known as f64),
            ConsolidationFn::Min | ConsolidationFn::Max | ConsolidationFn::Last => {
                Sample::from_f64(value)
            }
        }
    }
}

/// Converts a raw input into a rate for the interval ending at the update.
///
/// Returns the rate and the raw value to remember for the next update.
pub fn rate(ds: &DataSource, raw: Sample, last_raw: f64, interval: u64) -> (Sample, f64) {
    let raw = raw.for_kind(ds.kind);
    let remembered = raw.to_f64();

    if interval == 0 || interval > ds.heartbeat {
        return (Sample::Unknown, remembered);
    }
    let Sample::Known(value) = raw else {
        return (Sample::Unknown, remembered);
    };

    #[allow(clippy::cast_precision_loss)]
    let seconds = interval as f64;
    let rate = match ds.kind {
        DsKind::Gauge => Sample::Known(value),
        DsKind::Absolute => Sample::Known(value / seconds),
        DsKind::Counter | DsKind::Derive | DsKind::DCounter => {
            if last_raw.is_nan() || value < last_raw {
                Sample::Unknown
            } else {
                Sample::Known((value - last_raw) / seconds)
            }
        }
        DsKind::DDerive => {
            if last_raw.is_nan() {
                Sample::Unknown
            } else {
                Sample::Known((value - last_raw) / seconds)
            }
        }
    };

    let rate = match rate {
        Sample::Known(r) if r.is_finite() && ds.in_range(r) => Sample::Known(r),
        _ => Sample::Unknown,
    };
    (rate, remembered)
}

/// A row destined for one archive ring.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    /// Window end timestamp.
    pub timestamp: u64,
    /// One value per data source, NaN for unknown.
    pub values: Vec<f64>,
}

/// The complete effect of one update, computed before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    /// New last update timestamp.
    pub last_update: u64,
    /// New PDP state, one per data source.
    pub pdp_preps: Vec<PdpPrep>,
    /// New CDP state, indexed `[tier][ds]`.
    pub cdp_preps: Vec<Vec<CdpPrep>>,
    /// Rows to write, indexed by tier, oldest first.
    pub rows: Vec<Vec<StagedRow>>,
}

impl PendingUpdate {
    /// Computes the effect of `point` on the current state.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::OutOfOrder`] if the point is not after
    /// `last_update`, or [`UpdateError::UnknownDataSource`] if it names a
    /// data source the database does not declare.
    pub fn stage(
        db: &Database,
        last_update: u64,
        pdp_preps: &[PdpPrep],
        cdp_preps: &[Vec<CdpPrep>],
        point: &SamplePoint,
    ) -> Result<Self, UpdateError> {
        let t = point.timestamp;
        if t <= last_update {
            return Err(UpdateError::OutOfOrder {
                timestamp: t,
                last_update,
            });
        }
        if let Some(name) = point
            .values
            .keys()
            .find(|name| db.data_source(name).is_none())
        {
            return Err(UpdateError::UnknownDataSource { name: name.clone() });
        }

        let step = db.step;
        let interval = t - last_update;
        let step_start = last_update - last_update % step;
        let first_boundary = step_start + step;

        let mut new_pdp = pdp_preps.to_vec();
        let mut cdp = cdp_preps.to_vec();

        // Rates and the PDPs closed by this update, per data source.
        let mut first_pdps = Vec::with_capacity(db.data_sources.len());
        let mut rates = Vec::with_capacity(db.data_sources.len());
        for (ds, prep) in db.data_sources.iter().zip(new_pdp.iter_mut()) {
            let (rate, remembered) = rate(ds, point.get(&ds.name), prep.last_raw, interval);
            prep.last_raw = remembered;
            rates.push(rate);

            if t < first_boundary {
                prep.add(rate, interval);
                continue;
            }

            prep.add(rate, first_boundary - last_update);
            first_pdps.push(prep.close(step, ds.heartbeat));

            let post = t % step;
            *prep = PdpPrep {
                last_raw: prep.last_raw,
                value: 0.0,
                unknown_seconds: 0,
            };
            prep.add(rate, post);
        }

        let mut rows = vec![Vec::new(); db.archive_tiers.len()];
        if t >= first_boundary {
            let last_boundary = t - t % step;
            let run = PdpRun {
                first_timestamp: first_boundary,
                count: (last_boundary - step_start) / step,
                step,
                first: &first_pdps,
                rest: &rates,
            };
            for (index, tier) in db.archive_tiers.iter().enumerate() {
                rows[index] = run.consolidate(tier, &mut cdp[index]);
            }
        }

        Ok(Self {
            last_update: t,
            pdp_preps: new_pdp,
            cdp_preps: cdp,
            rows,
        })
    }
}

/// The PDPs closed by one update.
///
/// The first PDP mixes the previous state with the new rate; every later
/// one lies entirely inside the update interval and equals the rate.
struct PdpRun<'a> {
    first_timestamp: u64,
    count: u64,
    step: u64,
    first: &'a [Sample],
    rest: &'a [Sample],
}

impl PdpRun<'_> {
    fn consolidate(&self, tier: &ArchiveTier, preps: &mut [CdpPrep]) -> Vec<StagedRow> {
        let row_length = tier.row_length(self.step);
        let mut rows = Vec::new();

        let mut timestamp = self.first_timestamp;
        let mut remaining = self.count;
        let mut pdps = self.first;
        let mut aligned = false;

        // Feed one PDP at a time until a window boundary is reached.
        while remaining > 0 && !aligned {
            for (prep, pdp) in preps.iter_mut().zip(pdps) {
                prep.accumulate(tier.cf, *pdp);
            }
            if timestamp % row_length == 0 {
                rows.push(close_row(tier, preps, timestamp));
                aligned = true;
            }
            pdps = self.rest;
            remaining -= 1;
            timestamp += self.step;
        }
        if remaining == 0 {
            return rows;
        }

        // Whole windows of identical PDPs. Only the newest `row_count` of
        // them can survive in the ring.
        let windows = remaining / tier.steps_per_row;
        let skipped = windows.saturating_sub(tier.row_count);
        let window_end = timestamp - self.step + row_length;
        for window in skipped..windows {
            let values = self
                .rest
                .iter()
                .map(|rate| match rate {
                    Sample::Known(v) => *v,
                    Sample::Unknown => f64::NAN,
                })
                .collect();
            rows.push(StagedRow {
                timestamp: window_end + window * row_length,
                values,
            });
        }

        // Leftover PDPs start the next window.
        for _ in 0..remaining % tier.steps_per_row {
            for (prep, pdp) in preps.iter_mut().zip(self.rest) {
                prep.accumulate(tier.cf, *pdp);
            }
        }

        rows
    }
}

fn close_row(tier: &ArchiveTier, preps: &mut [CdpPrep], timestamp: u64) -> StagedRow {
    StagedRow {
        timestamp,
        values: preps.iter_mut().map(|prep| prep.close(tier).to_f64()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(kind: DsKind) -> DataSource {
        DataSource {
            name: "value".to_string(),
            kind,
            heartbeat: 600,
            min: None,
            max: None,
        }
    }

    fn database(step: u64, tiers: Vec<ArchiveTier>) -> Database {
        Database::new("test", step, vec![source(DsKind::Gauge)], tiers).unwrap()
    }

    fn tier(cf: ConsolidationFn, steps_per_row: u64, row_count: u64) -> ArchiveTier {
        ArchiveTier {
            cf,
            xff: 0.5,
            steps_per_row,
            row_count,
        }
    }

    fn point(timestamp: u64, value: Sample) -> SamplePoint {
        SamplePoint::new(timestamp).with("value", value)
    }

    /// Stages a sequence of points from `start`, returning every row written.
    fn run(db: &Database, start: u64, points: &[SamplePoint]) -> Vec<Vec<StagedRow>> {
        let mut last_update = start;
        let mut pdp = vec![PdpPrep::starting_at(start, db.step); db.data_sources.len()];
        let mut cdp = vec![vec![CdpPrep::default(); db.data_sources.len()]; db.archive_tiers.len()];
        let mut rows = vec![Vec::new(); db.archive_tiers.len()];

        for p in points {
            let pending = PendingUpdate::stage(db, last_update, &pdp, &cdp, p).unwrap();
            last_update = pending.last_update;
            pdp = pending.pdp_preps;
            cdp = pending.cdp_preps;
            for (all, new) in rows.iter_mut().zip(pending.rows) {
                all.extend(new);
            }
        }
        rows
    }

    #[test]
    fn test_rate_per_kind() {
        let gauge = source(DsKind::Gauge);
        assert_eq!(rate(&gauge, Sample::Known(5.0), f64::NAN, 300).0, Sample::Known(5.0));

        let counter = source(DsKind::Counter);
        assert_eq!(rate(&counter, Sample::Known(100.0), f64::NAN, 300).0, Sample::Unknown);
        assert_eq!(rate(&counter, Sample::Known(400.0), 100.0, 300).0, Sample::Known(1.0));
        // A decrease is a rollover
        assert_eq!(rate(&counter, Sample::Known(50.0), 100.0, 300).0, Sample::Unknown);
        // Inputs are rounded
        assert_eq!(rate(&counter, Sample::Known(399.6), 100.0, 300), (Sample::Known(1.0), 400.0));

        let dderive = source(DsKind::DDerive);
        assert_eq!(rate(&dderive, Sample::Known(0.0), 300.0, 300).0, Sample::Known(-1.0));

        let dcounter = source(DsKind::DCounter);
        assert_eq!(rate(&dcounter, Sample::Known(100.5), 100.0, 100).0, Sample::Known(0.005));

        let absolute = source(DsKind::Absolute);
        assert_eq!(rate(&absolute, Sample::Known(600.0), f64::NAN, 300).0, Sample::Known(2.0));
    }

    #[test]
    fn test_rate_heartbeat_and_range() {
        let gauge = source(DsKind::Gauge);
        assert_eq!(rate(&gauge, Sample::Known(5.0), f64::NAN, 601).0, Sample::Unknown);

        let mut bounded = source(DsKind::Gauge);
        bounded.min = Some(0.0);
        bounded.max = Some(100.0);
        assert_eq!(rate(&bounded, Sample::Known(101.0), f64::NAN, 300).0, Sample::Unknown);
        assert_eq!(rate(&bounded, Sample::Known(-1.0), f64::NAN, 300).0, Sample::Unknown);
        assert_eq!(rate(&bounded, Sample::Known(50.0), f64::NAN, 300).0, Sample::Known(50.0));
    }

    #[test]
    fn test_step_aligned_updates_produce_one_pdp_each() {
        let db = database(300, vec![tier(ConsolidationFn::Last, 1, 10)]);
        let rows = run(
            &db,
            300,
            &[
                point(600, Sample::Known(1.0)),
                point(900, Sample::Known(2.0)),
                point(1200, Sample::Known(3.0)),
            ],
        );

        let written: Vec<_> = rows[0].iter().map(|r| (r.timestamp, r.values[0])).collect();
        assert_eq!(written, vec![(600, 1.0), (900, 2.0), (1200, 3.0)]);
    }

    #[test]
    fn test_unaligned_updates_are_time_weighted() {
        let db = database(300, vec![tier(ConsolidationFn::Average, 1, 10)]);
        // 10 for (300, 450], 20 for (450, 600]
        let rows = run(
            &db,
            300,
            &[point(450, Sample::Known(10.0)), point(600, Sample::Known(20.0))],
        );

        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0][0].timestamp, 600);
        assert!((rows[0][0].values[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_with_one_unknown_of_three() {
        let db = database(300, vec![tier(ConsolidationFn::Average, 3, 10)]);
        let rows = run(
            &db,
            0,
            &[
                point(300, Sample::Unknown),
                point(600, Sample::Known(10.0)),
                point(900, Sample::Known(20.0)),
            ],
        );

        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0][0].timestamp, 900);
        assert!((rows[0][0].values[0] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_with_two_unknown_of_three() {
        let db = database(300, vec![tier(ConsolidationFn::Average, 3, 10)]);
        let rows = run(
            &db,
            0,
            &[
                point(300, Sample::Unknown),
                point(600, Sample::Unknown),
                point(900, Sample::Known(20.0)),
            ],
        );

        assert_eq!(rows[0].len(), 1);
        assert!(rows[0][0].values[0].is_nan());
    }

    #[test]
    fn test_min_max_last() {
        let values = [4.0, 9.0, 1.0];
        let points: Vec<_> = values
            .iter()
            .zip(1..)
            .map(|(v, i)| point(i * 60, Sample::Known(*v)))
            .collect();

        for (cf, expected) in [
            (ConsolidationFn::Min, 1.0),
            (ConsolidationFn::Max, 9.0),
            (ConsolidationFn::Last, 1.0),
        ] {
            let db = database(60, vec![tier(cf, 3, 4)]);
            let rows = run(&db, 0, &points);
            assert_eq!(rows[0][0].timestamp, 180);
            assert!((rows[0][0].values[0] - expected).abs() < 1e-9, "{cf}");
        }
    }

    #[test]
    fn test_long_gap_writes_at_most_row_count_rows() {
        let db = database(60, vec![tier(ConsolidationFn::Average, 1, 5), tier(ConsolidationFn::Average, 2, 3)]);
        let mut ds = source(DsKind::Gauge);
        ds.heartbeat = 100_000;
        let db = Database::new("test", 60, vec![ds], db.archive_tiers).unwrap();

        let rows = run(&db, 60, &[point(60 * 50, Sample::Known(7.0))]);

        // The first PDP closes on its own, then only the newest five windows
        let timestamps: Vec<_> = rows[0].iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![120, 2760, 2820, 2880, 2940, 3000]);
        assert!(rows[0].iter().all(|r| (r.values[0] - 7.0).abs() < 1e-9));

        let timestamps: Vec<_> = rows[1].iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![120, 2760, 2880, 3000]);
    }

    #[test]
    fn test_heartbeat_exceeded_is_unknown() {
        let db = database(300, vec![tier(ConsolidationFn::Average, 1, 10)]);
        let rows = run(&db, 300, &[point(1500, Sample::Known(5.0))]);

        assert_eq!(rows[0].len(), 4);
        assert!(rows[0].iter().all(|r| r.values[0].is_nan()));
    }

    #[test]
    fn test_out_of_order_and_unknown_names_rejected() {
        let db = database(300, vec![tier(ConsolidationFn::Average, 1, 10)]);
        let pdp = vec![PdpPrep::starting_at(600, 300)];
        let cdp = vec![vec![CdpPrep::default()]];

        let same = PendingUpdate::stage(&db, 600, &pdp, &cdp, &point(600, Sample::Known(1.0)));
        assert!(matches!(same, Err(UpdateError::OutOfOrder { timestamp: 600, last_update: 600 })));

        let stray = SamplePoint::new(900).with("other", Sample::Known(1.0));
        let result = PendingUpdate::stage(&db, 600, &pdp, &cdp, &stray);
        assert!(matches!(result, Err(UpdateError::UnknownDataSource { .. })));
    }
}
