//! File metadata in the shape of `rrdtool info`.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::{ConsolidationFn, DsKind};
use crate::slab::Slab;

/// Metadata and live state of a `.rrd` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RrdInfo {
    /// Path of the file.
    pub filename: String,
    /// Step in seconds.
    pub step: u64,
    /// Timestamp of the last committed update.
    pub last_update: u64,
    /// Data sources in file order.
    pub data_sources: Vec<DsInfo>,
    /// Archives in file order.
    pub archives: Vec<RraInfo>,
}

/// One data source with its PDP state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsInfo {
    /// Name.
    pub name: String,
    /// Input type.
    pub kind: DsKind,
    /// Heartbeat in seconds.
    pub heartbeat: u64,
    /// Lower bound.
    pub min: Option<f64>,
    /// Upper bound.
    pub max: Option<f64>,
    /// Last raw input.
    pub last_ds: Option<f64>,
    /// Accumulated `rate * seconds` of the open step.
    pub value: f64,
    /// Unknown seconds of the open step.
    pub unknown_sec: u64,
}

/// One archive with its CDP state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RraInfo {
    /// Consolidation function.
    pub cf: ConsolidationFn,
    /// Tolerated unknown fraction.
    pub xff: f64,
    /// PDPs per row.
    pub pdp_per_row: u64,
    /// Rows in the ring.
    pub rows: u64,
    /// Slot of the newest row.
    pub cur_row: u64,
    /// Open window state, one per data source.
    pub cdp_prep: Vec<CdpInfo>,
}

/// Open window state of one archive and data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdpInfo {
    /// Partial consolidated value.
    pub value: Option<f64>,
    /// Known PDPs so far.
    pub known: u64,
}

impl RrdInfo {
    /// Reads the metadata of an open slab.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a record cannot be decoded.
    pub fn from_slab(slab: &Slab) -> Result<Self, StoreError> {
        let data_sources = (0..slab.ds_count())
            .map(|index| {
                let record = slab.read_ds(index)?;
                Ok(DsInfo {
                    name: record.source.name,
                    kind: record.source.kind,
                    heartbeat: record.source.heartbeat,
                    min: record.source.min,
                    max: record.source.max,
                    last_ds: finite(record.pdp.last_raw),
                    value: record.pdp.value,
                    unknown_sec: record.pdp.unknown_seconds,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let archives = (0..slab.rra_count())
            .map(|rra| {
                let record = slab.read_rra(rra)?;
                let cdp_prep = (0..slab.ds_count())
                    .map(|ds| {
                        let prep = slab.read_cdp_prep(rra, ds);
                        CdpInfo {
                            value: finite(prep.value),
                            known: prep.known,
                        }
                    })
                    .collect();
                Ok(RraInfo {
                    cf: record.tier.cf,
                    xff: record.tier.xff,
                    pdp_per_row: record.tier.steps_per_row,
                    rows: record.tier.row_count,
                    cur_row: record.cur_row,
                    cdp_prep,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Self {
            filename: slab.path().to_string(),
            step: slab.step(),
            last_update: slab.last_update(),
            data_sources,
            archives,
        })
    }

    /// Names of the data sources in file order.
    pub fn ds_names(&self) -> impl Iterator<Item = &str> {
        self.data_sources.iter().map(|ds| ds.name.as_str())
    }

    /// Seconds covered by one row of archive `index`.
    pub fn resolution(&self, index: usize) -> Option<u64> {
        self.archives
            .get(index)
            .map(|rra| rra.pdp_per_row.saturating_mul(self.step))
    }
}

fn finite(value: f64) -> Option<f64> {
    Some(value).filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArchiveTier, DataSource, Database};
    use tempfile::tempdir;

    #[test]
    fn test_info_reflects_file() {
        let dir = tempdir().unwrap();
        let db = Database::new(
            "power",
            60,
            vec![DataSource {
                name: "watts".to_string(),
                kind: DsKind::Gauge,
                heartbeat: 120,
                min: Some(0.0),
                max: None,
            }],
            vec![
                ArchiveTier {
                    cf: ConsolidationFn::Average,
                    xff: 0.5,
                    steps_per_row: 1,
                    row_count: 60,
                },
                ArchiveTier {
                    cf: ConsolidationFn::Max,
                    xff: 0.5,
                    steps_per_row: 60,
                    row_count: 24,
                },
            ],
        )
        .unwrap();
        let slab = Slab::create(dir.path().join("power.rrd"), &db, 90).unwrap();

        let info = RrdInfo::from_slab(&slab).unwrap();
        assert_eq!(info.step, 60);
        assert_eq!(info.last_update, 90);
        assert_eq!(info.ds_names().collect::<Vec<_>>(), vec!["watts"]);
        assert_eq!(info.data_sources[0].min, Some(0.0));
        assert_eq!(info.data_sources[0].last_ds, None);
        assert_eq!(info.data_sources[0].unknown_sec, 30);
        assert_eq!(info.archives[1].cf, ConsolidationFn::Max);
        assert_eq!(info.resolution(1), Some(3600));
        assert_eq!(info.resolution(2), None);
        assert_eq!(info.archives[0].cdp_prep.len(), 1);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["archives"][1]["cf"], "MAX");
        assert_eq!(json["data_sources"][0]["kind"], "GAUGE");
        assert!(json["data_sources"][0]["max"].is_null());
    }
}
