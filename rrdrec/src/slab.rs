//! Memory-mapped `.rrd` file format.
//!
//! One file holds a whole database: its definition, the live consolidation
//! state, and one ring of rows per archive. All integers and floats are
//! little endian; unknown values are NaN.
//!
//! # File Format
//!
//! ```text
//! [0..64)              Header: magic "RRDR", version, step, ds_count,
//!                      rra_count, last_update
//! [64..+96*D)          Data source records: name[20], kind, heartbeat,
//!                      min, max, PDP prep (last raw, value, unknown seconds)
//! [..+48*R)            Archive records: cf, xff, steps_per_row, row_count,
//!                      cur_row
//! [..+16*R*D)          CDP prep records, archive-major
//! [..)                 Per archive ring: timestamp column (rows * 8), then
//!                      one value column (rows * 8) per data source
//! ```
//!
//! # Safety
//!
//! The only unsafe operation is creating the memory map. Every access goes
//! through bounds-checked byte slices whose offsets come from a layout
//! validated against the file size on open.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::consolidate::{CdpPrep, PdpPrep};
use crate::error::StoreError;
use crate::schema::{ArchiveTier, ConsolidationFn, DataSource, Database, DsKind, MAX_DS_NAME_LEN};

/// Magic bytes identifying an rrdrec file.
const MAGIC: [u8; 4] = *b"RRDR";

/// Current format version.
const VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 64;

/// Size of one data source record in bytes.
const DS_RECORD_SIZE: usize = 96;

/// Size of one archive record in bytes.
const RRA_RECORD_SIZE: usize = 48;

/// Size of one CDP prep record in bytes.
const CDP_RECORD_SIZE: usize = 16;

/// Size of the name field in a data source record.
const DS_NAME_SIZE: usize = MAX_DS_NAME_LEN + 1;

/// Size of timestamp and value cells.
const CELL_SIZE: usize = 8;

// Header field offsets.
const HDR_VERSION: usize = 4;
const HDR_STEP: usize = 8;
const HDR_DS_COUNT: usize = 16;
const HDR_RRA_COUNT: usize = 20;
const HDR_LAST_UPDATE: usize = 24;

// Data source record field offsets.
const DS_KIND: usize = 20;
const DS_HEARTBEAT: usize = 24;
const DS_MIN: usize = 32;
const DS_MAX: usize = 40;
const DS_LAST_RAW: usize = 48;
const DS_PDP_VALUE: usize = 56;
const DS_UNKNOWN_SECONDS: usize = 64;

// Archive record field offsets.
const RRA_CF: usize = 0;
const RRA_XFF: usize = 8;
const RRA_STEPS_PER_ROW: usize = 16;
const RRA_ROW_COUNT: usize = 24;
const RRA_CUR_ROW: usize = 32;

/// A data source record as stored in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct DsRecord {
    /// The definition.
    pub source: DataSource,
    /// Live PDP state.
    pub pdp: PdpPrep,
}

/// An archive record as stored in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct RraRecord {
    /// The definition.
    pub tier: ArchiveTier,
    /// Slot of the most recently written row.
    pub cur_row: u64,
}

/// Byte offsets of one archive ring.
#[derive(Debug, Clone, Copy)]
struct RingLayout {
    offset: usize,
    rows: usize,
}

/// Offsets of every region in a file.
#[derive(Debug, Clone)]
struct SlabLayout {
    ds_count: usize,
    rra_base: usize,
    cdp_base: usize,
    rings: Vec<RingLayout>,
    file_size: usize,
}

impl SlabLayout {
    /// Computes the layout, or `None` if it does not fit in memory.
    fn new(ds_count: usize, row_counts: &[u64]) -> Option<Self> {
        let rra_count = row_counts.len();
        let rra_base = HEADER_SIZE.checked_add(ds_count.checked_mul(DS_RECORD_SIZE)?)?;
        let cdp_base = rra_base.checked_add(rra_count.checked_mul(RRA_RECORD_SIZE)?)?;
        let mut offset = cdp_base.checked_add(
            rra_count
                .checked_mul(ds_count)?
                .checked_mul(CDP_RECORD_SIZE)?,
        )?;

        let mut rings = Vec::with_capacity(rra_count);
        for &rows in row_counts {
            let rows = usize::try_from(rows).ok()?;
            rings.push(RingLayout { offset, rows });
            // timestamp column plus one value column per data source
            let columns = ds_count.checked_add(1)?;
            offset = offset.checked_add(columns.checked_mul(rows)?.checked_mul(CELL_SIZE)?)?;
        }

        Some(Self {
            ds_count,
            rra_base,
            cdp_base,
            rings,
            file_size: offset,
        })
    }

    fn ds_offset(&self, ds: usize) -> usize {
        HEADER_SIZE + ds * DS_RECORD_SIZE
    }

    fn rra_offset(&self, rra: usize) -> usize {
        self.rra_base + rra * RRA_RECORD_SIZE
    }

    fn cdp_offset(&self, rra: usize, ds: usize) -> usize {
        self.cdp_base + (rra * self.ds_count + ds) * CDP_RECORD_SIZE
    }

    fn timestamp_offset(&self, rra: usize, slot: usize) -> usize {
        self.rings[rra].offset + slot * CELL_SIZE
    }

    fn value_offset(&self, rra: usize, ds: usize, slot: usize) -> usize {
        let ring = self.rings[rra];
        ring.offset + (ds + 1) * ring.rows * CELL_SIZE + slot * CELL_SIZE
    }
}

/// A memory-mapped `.rrd` file.
///
/// Slot indices passed to the row accessors must be below the archive's
/// row count; the ring layer guarantees this.
#[derive(Debug)]
pub struct Slab {
    mmap: MmapMut,
    layout: SlabLayout,
    path: String,
}

impl Slab {
    /// Creates a new file for `db` with `last_update = start`.
    ///
    /// Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Create`] if the file cannot be created, sized
    /// or mapped.
    pub fn create<P: AsRef<Path>>(path: P, db: &Database, start: u64) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let create_error = |source: io::Error| StoreError::Create {
            path: path_str.clone(),
            source,
        };

        let row_counts: Vec<u64> = db.archive_tiers.iter().map(|t| t.row_count).collect();
        let layout = SlabLayout::new(db.data_sources.len(), &row_counts).ok_or_else(|| {
            create_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "database layout is too large",
            ))
        })?;

        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(create_error)?;
        file.set_len(layout.file_size as u64).map_err(create_error)?;
        let mmap = map(&file).map_err(create_error)?;

        let mut slab = Self {
            mmap,
            layout,
            path: path_str.clone(),
        };
        slab.initialize(db, start);
        slab.flush().map_err(create_error)?;

        Ok(slab)
    }

    /// Opens and validates an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] on I/O failure, or
    /// [`StoreError::Corrupted`] if the header or size is wrong.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();
        let corrupted = |reason: String| StoreError::Corrupted {
            path: path_str.clone(),
            reason,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| StoreError::Open {
                path: path_str.clone(),
                source,
            })?;
        let mmap = map(&file).map_err(|source| StoreError::Open {
            path: path_str.clone(),
            source,
        })?;

        if mmap.len() < HEADER_SIZE {
            return Err(corrupted(format!(
                "file too small: {} bytes, expected at least {HEADER_SIZE}",
                mmap.len()
            )));
        }
        if mmap[..4] != MAGIC {
            return Err(corrupted(format!(
                "invalid magic bytes: expected {MAGIC:?}, found {:?}",
                &mmap[..4]
            )));
        }
        let version = read_u32(&mmap, HDR_VERSION);
        if version != VERSION {
            return Err(corrupted(format!(
                "unsupported version: expected {VERSION}, found {version}"
            )));
        }

        let ds_count = read_u32(&mmap, HDR_DS_COUNT) as usize;
        let rra_count = read_u32(&mmap, HDR_RRA_COUNT) as usize;
        if ds_count == 0 || rra_count == 0 {
            return Err(corrupted(format!(
                "empty definition: {ds_count} data sources, {rra_count} archives"
            )));
        }

        // Row counts live in the archive records, which must fit before the
        // full layout can be computed.
        let records_end = ds_count
            .checked_mul(DS_RECORD_SIZE)
            .and_then(|ds| rra_count.checked_mul(RRA_RECORD_SIZE)?.checked_add(ds))
            .and_then(|records| records.checked_add(HEADER_SIZE));
        if records_end.is_none_or(|end| end > mmap.len()) {
            return Err(corrupted("file too small for its records".to_string()));
        }
        let rra_base = HEADER_SIZE + ds_count * DS_RECORD_SIZE;
        let row_counts: Vec<u64> = (0..rra_count)
            .map(|rra| read_u64(&mmap, rra_base + rra * RRA_RECORD_SIZE + RRA_ROW_COUNT))
            .collect();

        let layout = SlabLayout::new(ds_count, &row_counts)
            .ok_or_else(|| corrupted("layout overflows".to_string()))?;
        if mmap.len() != layout.file_size {
            return Err(corrupted(format!(
                "file size mismatch: {} bytes, expected {}",
                mmap.len(),
                layout.file_size
            )));
        }

        let slab = Self {
            mmap,
            layout,
            path: path_str,
        };
        // Decoding checks kinds, consolidation functions and names.
        slab.database()?;
        Ok(slab)
    }

    fn initialize(&mut self, db: &Database, start: u64) {
        self.mmap[..4].copy_from_slice(&MAGIC);
        self.write_u32(HDR_VERSION, VERSION);
        self.write_u64(HDR_STEP, db.step);
        let ds_count = u32::try_from(db.data_sources.len()).unwrap_or(u32::MAX);
        let rra_count = u32::try_from(db.archive_tiers.len()).unwrap_or(u32::MAX);
        self.write_u32(HDR_DS_COUNT, ds_count);
        self.write_u32(HDR_RRA_COUNT, rra_count);
        self.set_last_update(start);

        for (index, ds) in db.data_sources.iter().enumerate() {
            let base = self.layout.ds_offset(index);
            let mut name = [0u8; DS_NAME_SIZE];
            let bytes = ds.name.as_bytes();
            let len = bytes.len().min(MAX_DS_NAME_LEN);
            name[..len].copy_from_slice(&bytes[..len]);
            self.mmap[base..base + DS_NAME_SIZE].copy_from_slice(&name);
            self.mmap[base + DS_KIND] = ds.kind.to_byte();
            self.write_u64(base + DS_HEARTBEAT, ds.heartbeat);
            self.write_f64(base + DS_MIN, ds.min.unwrap_or(f64::NAN));
            self.write_f64(base + DS_MAX, ds.max.unwrap_or(f64::NAN));
            self.write_pdp_prep(index, &PdpPrep::starting_at(start, db.step));
        }

        for (index, tier) in db.archive_tiers.iter().enumerate() {
            let base = self.layout.rra_offset(index);
            self.mmap[base + RRA_CF] = tier.cf.to_byte();
            self.write_f64(base + RRA_XFF, tier.xff);
            self.write_u64(base + RRA_STEPS_PER_ROW, tier.steps_per_row);
            self.write_u64(base + RRA_ROW_COUNT, tier.row_count);
            self.set_cur_row(index, 0);

            for ds in 0..db.data_sources.len() {
                self.write_cdp_prep(index, ds, &CdpPrep::default());
            }

            let rows = self.layout.rings[index].rows;
            for slot in 0..rows {
                self.write_row_timestamp(index, slot, 0);
                for ds in 0..db.data_sources.len() {
                    self.write_row_value(index, ds, slot, f64::NAN);
                }
            }
        }
    }

    /// Decodes the database definition stored in the file.
    ///
    /// The returned database is named after the file stem.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if a record cannot be decoded.
    pub fn database(&self) -> Result<Database, StoreError> {
        let data_sources = (0..self.ds_count())
            .map(|ds| self.read_ds(ds).map(|record| record.source))
            .collect::<Result<Vec<_>, _>>()?;
        let archive_tiers = (0..self.rra_count())
            .map(|rra| self.read_rra(rra).map(|record| record.tier))
            .collect::<Result<Vec<_>, _>>()?;

        let name = Path::new(&self.path)
            .file_stem()
            .map_or_else(|| "rrd".to_string(), |stem| stem.to_string_lossy().to_string());
        Database::new(&name, self.step(), data_sources, archive_tiers).map_err(|e| {
            StoreError::Corrupted {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the size of the file in bytes.
    pub fn file_size(&self) -> usize {
        self.layout.file_size
    }

    /// Returns the step in seconds.
    pub fn step(&self) -> u64 {
        read_u64(&self.mmap, HDR_STEP)
    }

    /// Returns the number of data sources.
    pub fn ds_count(&self) -> usize {
        self.layout.ds_count
    }

    /// Returns the number of archives.
    pub fn rra_count(&self) -> usize {
        self.layout.rings.len()
    }

    /// Returns the timestamp of the last committed update.
    pub fn last_update(&self) -> u64 {
        read_u64(&self.mmap, HDR_LAST_UPDATE)
    }

    /// Sets the timestamp of the last committed update.
    pub fn set_last_update(&mut self, timestamp: u64) {
        self.write_u64(HDR_LAST_UPDATE, timestamp);
    }

    /// Reads a data source record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the kind byte is invalid.
    pub fn read_ds(&self, ds: usize) -> Result<DsRecord, StoreError> {
        let base = self.layout.ds_offset(ds);
        let name_bytes = &self.mmap[base..base + DS_NAME_SIZE];
        let len = name_bytes.iter().position(|&b| b == 0).unwrap_or(DS_NAME_SIZE);
        let name = String::from_utf8_lossy(&name_bytes[..len]).to_string();

        let kind_byte = self.mmap[base + DS_KIND];
        let kind = DsKind::from_byte(kind_byte).ok_or_else(|| StoreError::Corrupted {
            path: self.path.clone(),
            reason: format!("data source '{name}' has invalid kind {kind_byte}"),
        })?;

        let bound = |offset| Some(self.read_f64(base + offset)).filter(|v| !v.is_nan());
        Ok(DsRecord {
            source: DataSource {
                name,
                kind,
                heartbeat: read_u64(&self.mmap, base + DS_HEARTBEAT),
                min: bound(DS_MIN),
                max: bound(DS_MAX),
            },
            pdp: PdpPrep {
                last_raw: self.read_f64(base + DS_LAST_RAW),
                value: self.read_f64(base + DS_PDP_VALUE),
                unknown_seconds: read_u64(&self.mmap, base + DS_UNKNOWN_SECONDS),
            },
        })
    }

    /// Writes the PDP state of a data source.
    pub fn write_pdp_prep(&mut self, ds: usize, prep: &PdpPrep) {
        let base = self.layout.ds_offset(ds);
        self.write_f64(base + DS_LAST_RAW, prep.last_raw);
        self.write_f64(base + DS_PDP_VALUE, prep.value);
        self.write_u64(base + DS_UNKNOWN_SECONDS, prep.unknown_seconds);
    }

    /// Reads an archive record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] if the consolidation function byte
    /// is invalid.
    pub fn read_rra(&self, rra: usize) -> Result<RraRecord, StoreError> {
        let base = self.layout.rra_offset(rra);
        let cf_byte = self.mmap[base + RRA_CF];
        let cf = ConsolidationFn::from_byte(cf_byte).ok_or_else(|| StoreError::Corrupted {
            path: self.path.clone(),
            reason: format!("archive {rra} has invalid consolidation function {cf_byte}"),
        })?;

        Ok(RraRecord {
            tier: ArchiveTier {
                cf,
                xff: self.read_f64(base + RRA_XFF),
                steps_per_row: read_u64(&self.mmap, base + RRA_STEPS_PER_ROW),
                row_count: read_u64(&self.mmap, base + RRA_ROW_COUNT),
            },
            cur_row: read_u64(&self.mmap, base + RRA_CUR_ROW),
        })
    }

    /// Returns the slot of the most recently written row.
    pub fn cur_row(&self, rra: usize) -> u64 {
        read_u64(&self.mmap, self.layout.rra_offset(rra) + RRA_CUR_ROW)
    }

    /// Sets the slot of the most recently written row.
    pub fn set_cur_row(&mut self, rra: usize, slot: u64) {
        let base = self.layout.rra_offset(rra);
        self.write_u64(base + RRA_CUR_ROW, slot);
    }

    /// Reads the CDP state of one archive and data source.
    pub fn read_cdp_prep(&self, rra: usize, ds: usize) -> CdpPrep {
        let base = self.layout.cdp_offset(rra, ds);
        CdpPrep {
            value: self.read_f64(base),
            known: read_u64(&self.mmap, base + 8),
        }
    }

    /// Writes the CDP state of one archive and data source.
    pub fn write_cdp_prep(&mut self, rra: usize, ds: usize, prep: &CdpPrep) {
        let base = self.layout.cdp_offset(rra, ds);
        self.write_f64(base, prep.value);
        self.write_u64(base + 8, prep.known);
    }

    /// Reads the timestamp stored in a slot; zero means never written.
    pub fn row_timestamp(&self, rra: usize, slot: usize) -> u64 {
        read_u64(&self.mmap, self.layout.timestamp_offset(rra, slot))
    }

    /// Writes the timestamp of a slot.
    pub fn write_row_timestamp(&mut self, rra: usize, slot: usize, timestamp: u64) {
        let offset = self.layout.timestamp_offset(rra, slot);
        self.write_u64(offset, timestamp);
    }

    /// Reads one value from a slot.
    pub fn row_value(&self, rra: usize, ds: usize, slot: usize) -> f64 {
        self.read_f64(self.layout.value_offset(rra, ds, slot))
    }

    /// Writes one value into a slot.
    pub fn write_row_value(&mut self, rra: usize, ds: usize, slot: usize, value: f64) {
        let offset = self.layout.value_offset(rra, ds, slot);
        self.write_f64(offset, value);
    }

    /// Flushes the map to disk.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `msync`.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    /// Starts writing dirty pages back without waiting for completion.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from `msync`.
    pub fn flush_async(&self) -> io::Result<()> {
        self.mmap.flush_async()
    }

    fn read_f64(&self, offset: usize) -> f64 {
        f64::from_bits(read_u64(&self.mmap, offset))
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.mmap[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, offset: usize, value: u64) {
        self.mmap[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn write_f64(&mut self, offset: usize, value: f64) {
        self.write_u64(offset, value.to_bits());
    }
}

fn map(file: &File) -> io::Result<MmapMut> {
    // SAFETY: The file is opened read/write by this process and is only
    // modified through this map while the owning `Slab` is alive. Other
    // processes are not expected to truncate it.
    unsafe { MmapMut::map_mut(file) }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_db() -> Database {
        Database::new(
            "climate",
            300,
            vec![
                DataSource {
                    name: "temp".to_string(),
                    kind: DsKind::Gauge,
                    heartbeat: 600,
                    min: Some(-40.0),
                    max: None,
                },
                DataSource {
                    name: "energy".to_string(),
                    kind: DsKind::Counter,
                    heartbeat: 900,
                    min: None,
                    max: None,
                },
            ],
            vec![
                ArchiveTier {
                    cf: ConsolidationFn::Average,
                    xff: 0.5,
                    steps_per_row: 1,
                    row_count: 10,
                },
                ArchiveTier {
                    cf: ConsolidationFn::Max,
                    xff: 0.25,
                    steps_per_row: 12,
                    row_count: 4,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("climate.rrd");
        let db = test_db();

        {
            let slab = Slab::create(&path, &db, 1_000).unwrap();
            assert_eq!(slab.step(), 300);
            assert_eq!(slab.ds_count(), 2);
            assert_eq!(slab.rra_count(), 2);
            assert_eq!(slab.last_update(), 1_000);
        }

        let slab = Slab::open(&path).unwrap();
        assert_eq!(slab.database().unwrap(), db);
        assert_eq!(slab.last_update(), 1_000);

        let expected = 64 + 2 * 96 + 2 * 48 + 2 * 2 * 16 + (3 * 10 * 8) + (3 * 4 * 8);
        assert_eq!(slab.file_size(), expected);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected as u64);
    }

    #[test]
    fn test_initial_state() {
        let dir = tempdir().unwrap();
        let slab = Slab::create(dir.path().join("climate.rrd"), &test_db(), 1_000).unwrap();

        let ds = slab.read_ds(0).unwrap();
        assert!(ds.pdp.last_raw.is_nan());
        assert_eq!(ds.pdp.unknown_seconds, 1_000 % 300);

        let cdp = slab.read_cdp_prep(1, 1);
        assert!(cdp.value.is_nan());
        assert_eq!(cdp.known, 0);

        for slot in 0..10 {
            assert_eq!(slab.row_timestamp(0, slot), 0);
            assert!(slab.row_value(0, 1, slot).is_nan());
        }
    }

    #[test]
    fn test_row_columns_do_not_overlap() {
        let dir = tempdir().unwrap();
        let mut slab = Slab::create(dir.path().join("climate.rrd"), &test_db(), 0).unwrap();

        slab.write_row_timestamp(0, 9, 3_000);
        slab.write_row_value(0, 0, 9, 1.5);
        slab.write_row_value(0, 1, 9, 2.5);
        slab.write_row_timestamp(1, 0, 3_600);
        slab.write_row_value(1, 0, 0, 7.0);

        assert_eq!(slab.row_timestamp(0, 9), 3_000);
        assert_eq!(slab.row_value(0, 0, 9), 1.5);
        assert_eq!(slab.row_value(0, 1, 9), 2.5);
        assert_eq!(slab.row_timestamp(1, 0), 3_600);
        assert_eq!(slab.row_value(1, 0, 0), 7.0);
        assert!(slab.row_value(1, 1, 0).is_nan());
    }

    #[test]
    fn test_prep_state_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("climate.rrd");

        {
            let mut slab = Slab::create(&path, &test_db(), 0).unwrap();
            slab.write_pdp_prep(
                1,
                &PdpPrep {
                    last_raw: 42.0,
                    value: 100.0,
                    unknown_seconds: 7,
                },
            );
            slab.write_cdp_prep(1, 0, &CdpPrep { value: 3.5, known: 2 });
            slab.set_cur_row(1, 3);
            slab.set_last_update(600);
            slab.flush().unwrap();
        }

        let slab = Slab::open(&path).unwrap();
        let ds = slab.read_ds(1).unwrap();
        assert_eq!(ds.pdp.last_raw, 42.0);
        assert_eq!(ds.pdp.unknown_seconds, 7);
        assert_eq!(slab.read_cdp_prep(1, 0), CdpPrep { value: 3.5, known: 2 });
        assert_eq!(slab.read_rra(1).unwrap().cur_row, 3);
        assert_eq!(slab.last_update(), 600);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("climate.rrd");
        Slab::create(&path, &test_db(), 0).unwrap();

        assert!(matches!(
            Slab::create(&path, &test_db(), 0),
            Err(StoreError::Create { .. })
        ));
    }

    #[test]
    fn test_open_rejects_corruption() {
        let dir = tempdir().unwrap();

        let garbage = dir.path().join("garbage.rrd");
        std::fs::write(&garbage, b"not an rrd file").unwrap();
        assert!(matches!(Slab::open(&garbage), Err(StoreError::Corrupted { .. })));

        let bad_magic = dir.path().join("magic.rrd");
        std::fs::write(&bad_magic, vec![0u8; 128]).unwrap();
        assert!(matches!(Slab::open(&bad_magic), Err(StoreError::Corrupted { .. })));

        let truncated = dir.path().join("truncated.rrd");
        Slab::create(&truncated, &test_db(), 0).unwrap();
        let file = OpenOptions::new().write(true).open(&truncated).unwrap();
        file.set_len(200).unwrap();
        drop(file);
        assert!(matches!(Slab::open(&truncated), Err(StoreError::Corrupted { .. })));

        assert!(matches!(
            Slab::open(dir.path().join("missing.rrd")),
            Err(StoreError::Open { .. })
        ));
    }
}
