//! Integration tests for the database file lifecycle.
//!
//! These tests verify that files are created once, survive reopening with
//! their state intact, reject out-of-order updates without side effects,
//! and refuse definitions whose layout no longer matches the file.

use rrdrec::error::{RrdError, StoreError, UpdateError};
use rrdrec::schema::{ArchiveTierDef, ConsolidationFn, DataSourceDef, Database, DsKind};
use rrdrec::store::{Rrd, Store};
use rrdrec::{Sample, SamplePoint};
use tempfile::tempdir;

/// Helper: a one minute database with a raw and an hourly archive.
fn climate(step: &str) -> Database {
    Database::define(
        "climate",
        step.parse().unwrap(),
        &[
            DataSourceDef {
                name: "temp".to_string(),
                kind: DsKind::Gauge,
                heartbeat: "5m".parse().unwrap(),
                min: Some(-40.0),
                max: Some(60.0),
            },
            DataSourceDef {
                name: "energy".to_string(),
                kind: DsKind::Counter,
                heartbeat: "5m".parse().unwrap(),
                min: None,
                max: None,
            },
        ],
        &[
            ArchiveTierDef {
                cf: ConsolidationFn::Average,
                xff: 0.5,
                steps: "1m".parse().unwrap(),
                rows: "1h".parse().unwrap(),
            },
            ArchiveTierDef {
                cf: ConsolidationFn::Max,
                xff: 0.5,
                steps: "1h".parse().unwrap(),
                rows: "1w".parse().unwrap(),
            },
        ],
    )
    .unwrap()
}

#[test]
fn test_create_is_idempotent_and_sized_up_front() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path().join("nested").join("rrd"));
    let db = climate("1m");

    assert!(store.create_at(&db, 0).unwrap());
    let size = std::fs::metadata(store.path_for("climate")).unwrap().len();
    assert!(!store.create_at(&db, 1_000).unwrap());
    assert_eq!(std::fs::metadata(store.path_for("climate")).unwrap().len(), size);

    let mut rrd = store.open(&db).unwrap();
    assert_eq!(rrd.last_update(), 0);
    for minute in 1..=500u64 {
        rrd.update(&SamplePoint::new(minute * 60).with("temp", Sample::Known(20.0)))
            .unwrap();
    }
    rrd.sync().unwrap();
    assert_eq!(std::fs::metadata(store.path_for("climate")).unwrap().len(), size);
}

#[test]
fn test_state_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());
    let db = climate("1m");
    store.create_at(&db, 0).unwrap();

    {
        let mut rrd = store.open(&db).unwrap();
        rrd.update(
            &SamplePoint::new(60)
                .with("temp", Sample::Known(18.0))
                .with("energy", Sample::Known(1_000.0)),
        )
        .unwrap();
        rrd.update(
            &SamplePoint::new(90)
                .with("temp", Sample::Known(19.0))
                .with("energy", Sample::Known(1_030.0)),
        )
        .unwrap();
        rrd.sync().unwrap();
    }

    let mut rrd = Rrd::open_path(store.path_for("climate")).unwrap();
    assert_eq!(rrd.last_update(), 90);
    assert_eq!(rrd.database().data_sources[1].kind, DsKind::Counter);

    let info = rrd.info().unwrap();
    assert_eq!(info.data_sources[1].last_ds, Some(1_030.0));
    // 30s of temp=19 and 30s of 1/s energy are pending in the open step
    assert!((info.data_sources[0].value - 570.0).abs() < 1e-9);
    assert!((info.data_sources[1].value - 30.0).abs() < 1e-9);

    rrd.update(
        &SamplePoint::new(120)
            .with("temp", Sample::Known(21.0))
            .with("energy", Sample::Known(1_060.0)),
    )
    .unwrap();
    let window = rrd.read_window("temp", 0, 0, 180).unwrap();
    assert_eq!(
        window.collect_all(),
        vec![(60, Sample::Known(18.0)), (120, Sample::Known(20.0))]
    );
    let energy = rrd.read_window("energy", 0, 0, 180).unwrap();
    assert_eq!(energy.collect_all()[1], (120, Sample::Known(1.0)));
}

#[test]
fn test_rejected_update_changes_nothing() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());
    let db = climate("1m");
    store.create_at(&db, 0).unwrap();
    let mut rrd = store.open(&db).unwrap();

    rrd.update(&SamplePoint::new(60).with("temp", Sample::Known(10.0)))
        .unwrap();
    let before = rrd.info().unwrap();

    for timestamp in [60, 30] {
        let err = rrd
            .update(&SamplePoint::new(timestamp).with("temp", Sample::Known(99.0)))
            .unwrap_err();
        assert!(matches!(
            err,
            RrdError::Update(UpdateError::OutOfOrder { last_update: 60, .. })
        ));
    }
    let err = rrd
        .update(&SamplePoint::new(120).with("pressure", Sample::Known(1.0)))
        .unwrap_err();
    assert!(matches!(err, RrdError::Update(UpdateError::UnknownDataSource { .. })));

    assert_eq!(rrd.info().unwrap(), before);
}

#[test]
fn test_reopen_with_different_layout_fails() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());
    store.create_at(&climate("1m"), 0).unwrap();

    let err = store.open(&climate("5m")).unwrap_err();
    assert!(matches!(err, RrdError::Store(StoreError::SchemaMismatch { .. })));

    // Soft drift is tolerated and the file wins
    let mut drifted = climate("1m");
    drifted.data_sources[0].max = Some(80.0);
    drifted.archive_tiers[1].xff = 0.9;
    let rrd = store.open(&drifted).unwrap();
    assert_eq!(rrd.database().data_sources[0].max, Some(60.0));
    assert!((rrd.database().archive_tiers[1].xff - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_open_rejects_foreign_files() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());
    std::fs::write(store.path_for("climate"), b"not an rrd file at all").unwrap();

    let err = store.open(&climate("1m")).unwrap_err();
    assert!(matches!(err, RrdError::Store(StoreError::Corrupted { .. })));

    let err = Rrd::open_path(temp_dir.path().join("missing.rrd")).unwrap_err();
    assert!(matches!(err, RrdError::Store(StoreError::Open { .. })));
}

#[test]
fn test_info_serializes_to_json() {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());
    let db = climate("1m");
    store.create_at(&db, 120).unwrap();
    let rrd = store.open(&db).unwrap();

    let json = serde_json::to_value(rrd.info().unwrap()).unwrap();
    assert_eq!(json["step"], 60);
    assert_eq!(json["last_update"], 120);
    assert_eq!(json["data_sources"][1]["kind"], "COUNTER");
    assert_eq!(json["archives"][1]["pdp_per_row"], 60);
    assert_eq!(json["archives"][1]["rows"], 168);
}
