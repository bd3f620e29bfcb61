//! Microbenchmarks for the `update()` path.
//!
//! Measures write latency per point with one and many data sources, with
//! a realistic tier layout, and across gaps that close many windows.
//!
//! Run with: `cargo bench -p rrdrec -- update`

#![allow(missing_docs, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rrdrec::schema::{ArchiveTier, ConsolidationFn, DataSource, Database, DsKind};
use rrdrec::store::{Rrd, Store};
use rrdrec::{Sample, SamplePoint};
use tempfile::tempdir;

/// Creates a database with a realistic five minute sensor layout.
fn setup(ds_count: u32) -> (Rrd, Vec<String>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let store = Store::new(temp_dir.path());

    let names: Vec<String> = (0..ds_count).map(|i| format!("sensor_{i}")).collect();
    let tier = |cf, steps_per_row, row_count| ArchiveTier {
        cf,
        xff: 0.5,
        steps_per_row,
        row_count,
    };
    let db = Database::new(
        "bench",
        300,
        names
            .iter()
            .map(|name| DataSource {
                name: name.clone(),
                kind: DsKind::Gauge,
                heartbeat: 900,
                min: None,
                max: None,
            })
            .collect(),
        vec![
            tier(ConsolidationFn::Average, 1, 288),
            tier(ConsolidationFn::Average, 12, 720),
            tier(ConsolidationFn::Max, 12, 720),
            tier(ConsolidationFn::Min, 288, 365),
        ],
    )
    .unwrap();
    store.create_at(&db, 0).unwrap();
    let rrd = store.open(&db).unwrap();

    (rrd, names, temp_dir)
}

fn bench_update_single(c: &mut Criterion) {
    let (mut rrd, names, _dir) = setup(1);
    let mut ts = 0u64;

    c.bench_function("update/single_source", |b| {
        b.iter(|| {
            ts += 300;
            let point = SamplePoint::new(ts).with(&names[0], Sample::Known(21.5));
            rrd.update(black_box(&point)).unwrap();
        });
    });
}

fn bench_update_many_sources(c: &mut Criterion) {
    let mut group = c.benchmark_group("update/source_count");

    for count in [1, 10, 30, 100] {
        let (mut rrd, names, _dir) = setup(count);
        let mut ts = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                ts += 300;
                let point = names
                    .iter()
                    .enumerate()
                    .fold(SamplePoint::new(ts), |point, (i, name)| {
                        point.with(name, Sample::Known(f64::from(i as u32)))
                    });
                rrd.update(black_box(&point)).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_update_mid_step(c: &mut Criterion) {
    let (mut rrd, names, _dir) = setup(10);
    let mut ts = 0u64;

    // Most updates land inside a step and only accumulate
    c.bench_function("update/mid_step_10_sources", |b| {
        b.iter(|| {
            ts += 7;
            let point = names
                .iter()
                .fold(SamplePoint::new(ts), |point, name| {
                    point.with(name, Sample::Known(99.9))
                });
            rrd.update(black_box(&point)).unwrap();
        });
    });
}

fn bench_update_after_gap(c: &mut Criterion) {
    let (mut rrd, names, _dir) = setup(1);
    let mut ts = 0u64;

    // A day-long gap closes hundreds of windows in every archive
    c.bench_function("update/after_one_day_gap", |b| {
        b.iter(|| {
            ts += 86_400;
            let point = SamplePoint::new(ts).with(&names[0], Sample::Known(1.0));
            rrd.update(black_box(&point)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_update_single,
    bench_update_many_sources,
    bench_update_mid_step,
    bench_update_after_gap,
);
criterion_main!(benches);
