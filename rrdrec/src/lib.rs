//! # rrdrec
//!
//! Round-robin recording of home sensor readings.
//!
//! rrdrec keeps fixed-size `.rrd` archives for numeric sensor streams,
//! following rrdtool's storage model: values are integrated into
//! step-aligned primary data points and consolidated at write time into
//! archives of different resolution and retention. Files never grow after
//! creation.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Memory-mapped files with a fixed layout decided at creation
//! - rrdtool data source kinds: GAUGE, COUNTER, DERIVE, DCOUNTER, DDERIVE, ABSOLUTE
//! - AVERAGE, MIN, MAX and LAST archives with xff handling
//! - Event-driven or wall-clock polling samplers, one writer per database
//! - rrdgraph-style graph descriptors, rendering left to the caller
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rrdrec::{Database, Sample, SamplePoint, Store};
//! use rrdrec::schema::{ArchiveTierDef, ConsolidationFn, DataSourceDef, DsKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Five minute steps, averaged hourly and kept for a year
//! let db = Database::define(
//!     "climate",
//!     "5m".parse()?,
//!     &[DataSourceDef {
//!         name: "temp".to_string(),
//!         kind: DsKind::Gauge,
//!         heartbeat: "15m".parse()?,
//!         min: Some(-40.0),
//!         max: Some(60.0),
//!     }],
//!     &[
//!         ArchiveTierDef { cf: ConsolidationFn::Average, xff: 0.5, steps: "5m".parse()?, rows: "1d".parse()? },
//!         ArchiveTierDef { cf: ConsolidationFn::Average, xff: 0.5, steps: "1h".parse()?, rows: "1y".parse()? },
//!     ],
//! )?;
//!
//! // Create the file if missing, then open it
//! let store = Store::new("./rrd");
//! store.create(&db)?;
//! let mut rrd = store.open(&db)?;
//!
//! // Record a value
//! let now = rrdrec::store::unix_now();
//! rrd.update(&SamplePoint::new(now).with("temp", Sample::Known(21.5)))?;
//!
//! // Read the last week of the hourly archive
//! let window = rrd.read_window("temp", 1, now - 7 * 86_400, now)?;
//! for (timestamp, sample) in &window {
//!     println!("{timestamp}: {sample}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Store`]: a directory of `.rrd` files; creates and opens databases
//! - [`Rrd`]: one open file; update, read, info
//! - [`Database`]: validated definition of steps, data sources and archives
//! - [`Recorder`]: runs the samplers of a [`RecorderConfig`]
//! - [`Graph`]: rrdgraph arguments for a file
//!
//! ## Modules
//!
//! - [`duration`]: scaled-duration literals (`5m`, `1d`)
//! - [`schema`]: data source and archive definitions
//! - [`sample`]: sample values and points
//! - [`consolidate`]: rate conversion and PDP/CDP consolidation
//! - [`store`]: file lifecycle, update, read
//! - [`ring`]: ring buffers over memory-mapped slabs
//! - [`slab`]: raw memory-mapped file format
//! - [`query`]: window reads
//! - [`info`]: file metadata
//! - [`sampler`]: sampling strategies
//! - [`graph`]: graph descriptors
//! - [`config`]: JSON configuration
//! - [`recorder`]: sampler lifecycle
//! - [`error`]: error types

pub mod config;
pub mod consolidate;
pub mod duration;
pub mod error;
pub mod graph;
pub mod info;
pub mod query;
pub mod recorder;
pub mod ring;
pub mod sample;
pub mod sampler;
pub mod schema;
pub mod slab;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use config::{GraphConfig, RecorderConfig};
pub use duration::ScaledDuration;
pub use error::{Result, RrdError};
pub use graph::{Graph, GraphDescriptor, GraphRenderer, PlotPrimitive};
pub use info::RrdInfo;
pub use query::Window;
pub use recorder::Recorder;
pub use sample::{Sample, SamplePoint};
pub use sampler::{SensorState, UpdateStrategy};
pub use schema::{ConsolidationFn, Database, DsKind};
pub use store::{Rrd, Store};
