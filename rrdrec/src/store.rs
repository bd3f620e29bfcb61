//! Store directory and the per-database [`Rrd`] handle.
//!
//! A [`Store`] is a directory holding one `<name>.rrd` file per database.
//! Creating a database that already has a file is a no-op; the file is
//! never re-created. Opening reconciles the configured definition with the
//! one stored in the file.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──create()──► Created ──open()──► Ready (Rrd)
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use rrdrec::sample::{Sample, SamplePoint};
//! use rrdrec::schema::{ArchiveTierDef, ConsolidationFn, DataSourceDef, Database, DsKind};
//! use rrdrec::store::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::define(
//!     "climate",
//!     "5m".parse()?,
//!     &[DataSourceDef {
//!         name: "temp".to_string(),
//!         kind: DsKind::Gauge,
//!         heartbeat: "10m".parse()?,
//!         min: None,
//!         max: None,
//!     }],
//!     &[ArchiveTierDef {
//!         cf: ConsolidationFn::Average,
//!         xff: 0.5,
//!         steps: "1".parse()?,
//!         rows: "1d".parse()?,
//!     }],
//! )?;
//!
//! let store = Store::new("./rrd");
//! store.create(&db)?;
//! let mut rrd = store.open(&db)?;
//! rrd.update(&SamplePoint::new(1_700_000_100).with("temp", Sample::Known(21.5)))?;
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::consolidate::PendingUpdate;
use crate::error::{QueryError, Result, StoreError, UpdateError};
use crate::info::RrdInfo;
use crate::query::Window;
use crate::ring::RingBuffer;
use crate::sample::SamplePoint;
use crate::schema::Database;
use crate::slab::Slab;

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// A directory of `.rrd` files.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Creates a store rooted at `dir`. Nothing is touched until a
    /// database is created.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the file backing database `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.rrd"))
    }

    /// Whether a file exists for database `name`.
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Creates the file for `db` starting now, unless it already exists.
    ///
    /// Returns `true` if a file was created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Create`] if the directory or file cannot be
    /// created.
    pub fn create(&self, db: &Database) -> Result<bool> {
        self.create_at(db, unix_now())
    }

    /// Creates the file for `db` with `last_update = start`, unless it
    /// already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Create`] if the directory or file cannot be
    /// created. A partially written file is removed.
    pub fn create_at(&self, db: &Database, start: u64) -> Result<bool> {
        let path = self.path_for(&db.name);
        if path.exists() {
            debug!(database = %db.name, path = %path.display(), "database file exists, not creating");
            return Ok(false);
        }

        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Create {
            path: self.dir.to_string_lossy().to_string(),
            source,
        })?;

        match Slab::create(&path, db, start) {
            Ok(_) => {
                debug!(database = %db.name, path = %path.display(), start, "created database file");
                Ok(true)
            }
            Err(e) => {
                let raced = matches!(
                    &e,
                    StoreError::Create { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists
                );
                if !raced {
                    let _ = fs::remove_file(&path);
                }
                Err(e.into())
            }
        }
    }

    /// Opens the file for `db` and reconciles the two definitions.
    ///
    /// Differences that change the file layout (step, data source names or
    /// order, archive count, consolidation function, steps per row, row
    /// count) are rejected. Other differences are logged and the file's
    /// definition is used.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`], [`StoreError::Corrupted`] or
    /// [`StoreError::SchemaMismatch`].
    pub fn open(&self, db: &Database) -> Result<Rrd> {
        let path = self.path_for(&db.name);
        let slab = Slab::open(&path)?;
        let mut stored = slab.database()?;
        reconcile(db, &stored, slab.path())?;
        stored.name.clone_from(&db.name);
        Ok(Rrd::from_slab(slab, stored))
    }
}

/// Compares a configured definition with the one read from a file.
fn reconcile(configured: &Database, stored: &Database, path: &str) -> std::result::Result<(), StoreError> {
    let mismatch = |reason: String| StoreError::SchemaMismatch {
        path: path.to_string(),
        reason,
    };

    if configured.step != stored.step {
        return Err(mismatch(format!(
            "step is {}s in config, {}s in file",
            configured.step, stored.step
        )));
    }

    let configured_names: Vec<&str> = configured.data_sources.iter().map(|ds| ds.name.as_str()).collect();
    let stored_names: Vec<&str> = stored.data_sources.iter().map(|ds| ds.name.as_str()).collect();
    if configured_names != stored_names {
        return Err(mismatch(format!(
            "data sources are {configured_names:?} in config, {stored_names:?} in file"
        )));
    }

    if configured.archive_tiers.len() != stored.archive_tiers.len() {
        return Err(mismatch(format!(
            "{} archives in config, {} in file",
            configured.archive_tiers.len(),
            stored.archive_tiers.len()
        )));
    }

    for (index, (want, have)) in configured
        .archive_tiers
        .iter()
        .zip(&stored.archive_tiers)
        .enumerate()
    {
        if want.cf != have.cf || want.steps_per_row != have.steps_per_row || want.row_count != have.row_count {
            return Err(mismatch(format!(
                "archive {index} is {}:{}:{} in config, {}:{}:{} in file",
                want.cf, want.steps_per_row, want.row_count, have.cf, have.steps_per_row, have.row_count
            )));
        }
        if want.xff.to_bits() != have.xff.to_bits() {
            warn!(
                database = %configured.name,
                archive = index,
                configured = want.xff,
                file = have.xff,
                "xff differs from file, using file"
            );
        }
    }

    for (want, have) in configured.data_sources.iter().zip(&stored.data_sources) {
        if want.kind != have.kind
            || want.heartbeat != have.heartbeat
            || want.min != have.min
            || want.max != have.max
        {
            warn!(
                database = %configured.name,
                data_source = %want.name,
                configured = ?want,
                file = ?have,
                "data source differs from file, using file"
            );
        }
    }

    Ok(())
}

/// An open database, ready for updates and reads.
///
/// `Rrd` owns the memory map. There is exactly one writer per file.
#[derive(Debug)]
pub struct Rrd {
    slab: Slab,
    db: Database,
    rings: Vec<RingBuffer>,
}

impl Rrd {
    /// Opens a file directly, using its stored definition as-is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] or [`StoreError::Corrupted`].
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let slab = Slab::open(path)?;
        let db = slab.database()?;
        Ok(Self::from_slab(slab, db))
    }

    fn from_slab(slab: Slab, db: Database) -> Self {
        let rings = db
            .archive_tiers
            .iter()
            .enumerate()
            .map(|(index, tier)| RingBuffer::new(index, tier.row_length(db.step), tier.row_count))
            .collect();
        Self { slab, db, rings }
    }

    /// Returns the effective definition (the file's).
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &str {
        self.slab.path()
    }

    /// Returns the timestamp of the last committed update.
    pub fn last_update(&self) -> u64 {
        self.slab.last_update()
    }

    /// Commits one sample point.
    ///
    /// The whole update is computed first; the file is only touched once
    /// it is known to succeed, so a rejected update changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::OutOfOrder`] if `point.timestamp` is not after
    /// the last update, [`UpdateError::UnknownDataSource`] for undeclared
    /// names, or [`UpdateError::Write`] if flushing fails.
    pub fn update(&mut self, point: &SamplePoint) -> Result<()> {
        let pdp_preps = (0..self.db.data_sources.len())
            .map(|ds| self.slab.read_ds(ds).map(|record| record.pdp))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let cdp_preps: Vec<Vec<_>> = (0..self.db.archive_tiers.len())
            .map(|rra| {
                (0..self.db.data_sources.len())
                    .map(|ds| self.slab.read_cdp_prep(rra, ds))
                    .collect()
            })
            .collect();

        let pending = PendingUpdate::stage(&self.db, self.slab.last_update(), &pdp_preps, &cdp_preps, point)?;
        self.apply(&pending);

        self.slab.flush_async().map_err(|source| UpdateError::Write {
            path: self.slab.path().to_string(),
            source,
        })?;
        Ok(())
    }

    fn apply(&mut self, pending: &PendingUpdate) {
        for (ring, rows) in self.rings.iter().zip(&pending.rows) {
            for row in rows {
                ring.write_row(&mut self.slab, row.timestamp, &row.values);
            }
        }
        for (rra, preps) in pending.cdp_preps.iter().enumerate() {
            for (ds, prep) in preps.iter().enumerate() {
                self.slab.write_cdp_prep(rra, ds, prep);
            }
        }
        for (ds, prep) in pending.pdp_preps.iter().enumerate() {
            self.slab.write_pdp_prep(ds, prep);
        }
        self.slab.set_last_update(pending.last_update);
    }

    /// Reads the rows of `ds_name` in archive `tier` with `start <= ts < end`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownDataSource`], [`QueryError::InvalidTier`]
    /// or [`QueryError::InvalidTimeRange`].
    pub fn read_window(&self, ds_name: &str, tier: usize, start: u64, end: u64) -> Result<Window<'_>> {
        let (ds, _) = self
            .db
            .data_source(ds_name)
            .ok_or_else(|| QueryError::UnknownDataSource {
                name: ds_name.to_string(),
            })?;
        let (Some(ring), Some(archive)) = (self.rings.get(tier), self.db.archive_tiers.get(tier)) else {
            return Err(QueryError::InvalidTier {
                tier,
                tiers: self.rings.len(),
            }
            .into());
        };
        if start >= end {
            return Err(QueryError::InvalidTimeRange { start, end }.into());
        }

        Ok(Window::new(&self.slab, *ring, ds, archive.cf, (start, end)))
    }

    /// Returns `rrdtool info`-style metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a record cannot be decoded.
    pub fn info(&self) -> Result<RrdInfo> {
        Ok(RrdInfo::from_slab(&self.slab)?)
    }

    /// Flushes all changes to disk and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Write`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.slab.flush().map_err(|source| UpdateError::Write {
            path: self.slab.path().to_string(),
            source,
        })?;
        Ok(())
    }
}
