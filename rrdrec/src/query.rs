//! Window reads over a single archive.
//!
//! [`Window`] wraps a ring iterator with metadata about the read: which
//! archive answered it, at what resolution, what range the archive still
//! retains, and whether the requested range reaches past that retention.
//!
//! A window is restartable: [`Window::iter`] may be called any number of
//! times and every call yields the same rows.
//!
//! ```rust,no_run
//! # use rrdrec::store::Store;
//! # use rrdrec::schema::Database;
//! # fn example(store: &Store, db: &Database) -> rrdrec::Result<()> {
//! let rrd = store.open(db)?;
//! let window = rrd.read_window("temp", 0, 1_700_000_000, 1_700_086_400)?;
//! println!("{} at {}s resolution", window.cf(), window.resolution());
//! for (timestamp, sample) in &window {
//!     println!("{timestamp}: {sample}");
//! }
//! # Ok(())
//! # }
//! ```

use crate::ring::{RingBuffer, RingIter};
use crate::sample::Sample;
use crate::schema::ConsolidationFn;
use crate::slab::Slab;

/// Rows of one data source in one archive over `[start, end)`.
#[derive(Debug, Clone)]
pub struct Window<'a> {
    slab: &'a Slab,
    ring: RingBuffer,
    ds: usize,
    cf: ConsolidationFn,
    requested_range: (u64, u64),
}

impl<'a> Window<'a> {
    pub(crate) fn new(
        slab: &'a Slab,
        ring: RingBuffer,
        ds: usize,
        cf: ConsolidationFn,
        requested_range: (u64, u64),
    ) -> Self {
        Self {
            slab,
            ring,
            ds,
            cf,
            requested_range,
        }
    }

    /// Returns a fresh iterator over the rows, oldest first.
    pub fn iter(&self) -> RingIter<'a> {
        let (start, end) = self.requested_range;
        self.ring.iter(self.slab, self.ds, start, end)
    }

    /// Returns the archive index that answered the read.
    pub fn tier(&self) -> usize {
        self.ring.tier()
    }

    /// Returns the consolidation function of the archive.
    pub fn cf(&self) -> ConsolidationFn {
        self.cf
    }

    /// Returns the seconds covered by each row.
    pub fn resolution(&self) -> u64 {
        self.ring.row_length()
    }

    /// Returns the requested `(start, end)` range.
    pub fn requested_range(&self) -> (u64, u64) {
        self.requested_range
    }

    /// Returns `(oldest, newest)` timestamps the archive retains.
    pub fn available_range(&self) -> (Option<u64>, Option<u64>) {
        (
            self.ring.oldest_retained(self.slab),
            self.ring.newest_timestamp(self.slab),
        )
    }

    /// Whether part of the requested range lies before the retained rows.
    ///
    /// An empty archive reports `true`.
    pub fn may_be_incomplete(&self) -> bool {
        match self.ring.oldest_retained(self.slab) {
            Some(oldest) => self.requested_range.0 < oldest,
            None => true,
        }
    }

    /// Collects the rows into a vector.
    pub fn collect_all(&self) -> Vec<(u64, Sample)> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &Window<'a> {
    type Item = (u64, Sample);
    type IntoIter = RingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for Window<'a> {
    type Item = (u64, Sample);
    type IntoIter = RingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
