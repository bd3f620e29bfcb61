//! Per-archive ring buffers inside a slab.
//!
//! Each archive stores its rows in a fixed number of slots. A row's slot is
//! derived from its timestamp, so writing a new row silently evicts the row
//! that occupied the slot `row_count` windows earlier.
//!
//! # Design
//!
//! - Slot computation: `slot = (timestamp / row_length) % row_count`
//! - `cur_row` in the archive record points at the newest row
//! - A slot whose stored timestamp differs from the expected one has been
//!   overwritten or never written and is skipped on read
//! - NaN values are unknown rows and are yielded as [`Sample::Unknown`]

use crate::sample::Sample;
use crate::slab::Slab;

/// Ring semantics for one archive of a slab.
///
/// This is a small `Copy` descriptor; the rows themselves live in the slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBuffer {
    tier: usize,
    row_length: u64,
    row_count: u64,
}

impl RingBuffer {
    /// Creates the ring for archive `tier`.
    ///
    /// `row_length` is `steps_per_row * step` in seconds.
    pub fn new(tier: usize, row_length: u64, row_count: u64) -> Self {
        Self {
            tier,
            row_length: row_length.max(1),
            row_count: row_count.max(1),
        }
    }

    /// Returns the archive index.
    pub fn tier(&self) -> usize {
        self.tier
    }

    /// Returns the seconds covered by one row.
    pub fn row_length(&self) -> u64 {
        self.row_length
    }

    /// Returns the number of slots.
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Computes the slot for a row timestamp.
    #[inline]
    #[allow(clippy::cast_possible_truncation)] // bounded by row_count, which fits the map
    pub fn slot(&self, timestamp: u64) -> usize {
        ((timestamp / self.row_length) % self.row_count) as usize
    }

    /// Writes one row and makes it the newest.
    pub fn write_row(&self, slab: &mut Slab, timestamp: u64, values: &[f64]) {
        let slot = self.slot(timestamp);
        slab.write_row_timestamp(self.tier, slot, timestamp);
        for (ds, &value) in values.iter().enumerate() {
            slab.write_row_value(self.tier, ds, slot, value);
        }
        slab.set_cur_row(self.tier, slot as u64);
    }

    /// Returns the timestamp of the newest row, or `None` if empty.
    pub fn newest_timestamp(&self, slab: &Slab) -> Option<u64> {
        let cur_row = usize::try_from(slab.cur_row(self.tier)).ok()?;
        if cur_row as u64 >= self.row_count {
            return None;
        }
        Some(slab.row_timestamp(self.tier, cur_row)).filter(|&ts| ts != 0)
    }

    /// Returns the oldest timestamp still retained, or `None` if empty.
    ///
    /// This bound is arithmetic: rows may be missing inside the range.
    pub fn oldest_retained(&self, slab: &Slab) -> Option<u64> {
        let newest = self.newest_timestamp(slab)?;
        let span = (self.row_count - 1).saturating_mul(self.row_length);
        Some(newest.saturating_sub(span))
    }

    /// Iterates rows of data source `ds` with `start <= ts < end`, oldest first.
    pub fn iter<'a>(&self, slab: &'a Slab, ds: usize, start: u64, end: u64) -> RingIter<'a> {
        let empty = RingIter {
            slab,
            ring: *self,
            ds,
            next: 1,
            last: 0,
        };
        if start >= end {
            return empty;
        }
        let (Some(newest), Some(oldest)) = (self.newest_timestamp(slab), self.oldest_retained(slab))
        else {
            return empty;
        };

        let Some(first) = start
            .div_ceil(self.row_length)
            .checked_mul(self.row_length)
            // rows are stamped at window ends, never at zero
            .map(|aligned| aligned.max(oldest).max(self.row_length))
        else {
            return empty;
        };
        let before_end = end - 1;
        let last = (before_end - before_end % self.row_length).min(newest);

        RingIter {
            next: first,
            last,
            ..empty
        }
    }
}

/// Lazy iterator over the rows of one data source in one archive.
///
/// Yields `(timestamp, sample)` in chronological order. Cloning restarts
/// from the clone point.
#[derive(Debug, Clone)]
pub struct RingIter<'a> {
    slab: &'a Slab,
    ring: RingBuffer,
    ds: usize,
    next: u64,
    last: u64,
}

impl Iterator for RingIter<'_> {
    type Item = (u64, Sample);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next <= self.last {
            let timestamp = self.next;
            match timestamp.checked_add(self.ring.row_length) {
                Some(next) => self.next = next,
                None => self.last = 0,
            }

            let slot = self.ring.slot(timestamp);
            if self.slab.row_timestamp(self.ring.tier, slot) == timestamp {
                let value = self.slab.row_value(self.ring.tier, self.ds, slot);
                return Some((timestamp, Sample::from_f64(value)));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.next > self.last {
            return (0, Some(0));
        }
        let upper = usize::try_from((self.last - self.next) / self.ring.row_length + 1).ok();
        (0, upper)
    }
}
