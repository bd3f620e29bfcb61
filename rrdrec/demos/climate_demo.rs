//! Demonstration of write-time consolidation in rrdrec.
//!
//! This example records two simulated days of five minute temperature and
//! energy readings, then reads back the hourly and daily archives and
//! prints the graph arguments for the file.

use rrdrec::schema::{ArchiveTierDef, ConsolidationFn, DataSourceDef, DsKind};
use rrdrec::{Database, GraphDescriptor, Sample, SamplePoint, ScaledDuration, Store};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store_dir = "./climate_demo_rrd";
    let _ = std::fs::remove_dir_all(store_dir);

    let db = Database::define(
        "climate",
        "5m".parse()?,
        &[
            DataSourceDef {
                name: "temp".to_string(),
                kind: DsKind::Gauge,
                heartbeat: "15m".parse()?,
                min: Some(-40.0),
                max: Some(60.0),
            },
            // Meter reading in Wh; stored as a W rate
            DataSourceDef {
                name: "energy".to_string(),
                kind: DsKind::Counter,
                heartbeat: "15m".parse()?,
                min: Some(0.0),
                max: None,
            },
        ],
        &[
            // Raw five minute points for a day
            ArchiveTierDef {
                cf: ConsolidationFn::Average,
                xff: 0.5,
                steps: ScaledDuration::raw(1)?,
                rows: "1d".parse()?,
            },
            // Hourly peaks for a week
            ArchiveTierDef {
                cf: ConsolidationFn::Max,
                xff: 0.5,
                steps: "1h".parse()?,
                rows: "1w".parse()?,
            },
            // Daily lows for a year
            ArchiveTierDef {
                cf: ConsolidationFn::Min,
                xff: 0.5,
                steps: "1d".parse()?,
                rows: "1y".parse()?,
            },
        ],
    )?;

    let start = 1_700_006_400; // a UTC midnight
    let store = Store::new(store_dir);
    store.create_at(&db, start)?;
    let mut rrd = store.open(&db)?;
    let path = store.path_for("climate");
    println!("Created {} ({} bytes)", path.display(), std::fs::metadata(&path)?.len());

    // Two days of readings: a daily temperature swing and a 600 W load
    let mut meter = 0.0;
    for i in 1..=576u32 {
        let ts = start + u64::from(i) * 300;
        let hour = f64::from(i % 288) / 12.0;
        let temp = 12.0 + 8.0 * ((hour - 9.0) / 24.0 * std::f64::consts::TAU).sin();
        meter += 600.0 * 300.0 / 3600.0;

        rrd.update(
            &SamplePoint::new(ts)
                .with("temp", Sample::Known(temp))
                .with("energy", Sample::Known(meter)),
        )?;
    }
    rrd.sync()?;
    println!("Recorded 576 points, last update {}", rrd.last_update());

    let hourly = rrd.read_window("temp", 1, start, rrd.last_update() + 1)?;
    println!();
    println!("Hourly {} temp ({}s rows):", hourly.cf(), hourly.resolution());
    for (ts, sample) in hourly.iter().take(6) {
        println!("  {ts}: {sample:.2}");
    }

    let daily = rrd.read_window("temp", 2, start, rrd.last_update() + 1)?;
    println!();
    println!("Daily {} temp:", daily.cf());
    for (ts, sample) in &daily {
        println!("  {ts}: {sample:.2}");
    }

    let energy = rrd.read_window("energy", 0, start, rrd.last_update() + 1)?;
    if let Some((ts, sample)) = energy.iter().last() {
        println!();
        println!("Energy rate at {ts}: {sample} (Wh/s)");
    }

    println!();
    println!("Graph arguments:");
    for arg in GraphDescriptor::build(&rrd.info()?, &[]).to_args() {
        println!("  {arg}");
    }

    std::fs::remove_dir_all(store_dir)?;
    Ok(())
}
