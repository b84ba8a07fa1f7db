//! Interval sets of block ids
//!
//! Blocks are handed out sequentially in long spans, so a file's block list
//! is stored as a handful of `(start, length)` extents rather than one entry
//! per block. Memory use and encoded size grow with fragmentation, not with
//! file size.

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An extent representing a contiguous range of blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Starting block ID
    pub start: u64,
    /// Number of contiguous blocks
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Extent { start, length }
    }

    /// One past the last block in this extent
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// Check if this extent contains a block ID
    pub fn contains(&self, block_id: u64) -> bool {
        block_id >= self.start && block_id < self.end()
    }

    /// Check if this extent touches or overlaps another (can be coalesced)
    pub fn touches(&self, other: &Extent) -> bool {
        self.start <= other.end() && other.start <= self.end()
    }

    /// Coalesce two touching extents
    pub fn coalesce(&self, other: &Extent) -> Option<Extent> {
        if !self.touches(other) {
            return None;
        }

        let new_start = self.start.min(other.start);
        let new_end = self.end().max(other.end());

        Some(Extent::new(new_start, new_end - new_start))
    }
}

/// A set of non-negative integers stored as sorted, disjoint extents
///
/// Invariants held after every mutation:
/// - every extent has `length >= 1`
/// - extents never overlap and never touch (`a.end() < b.start`)
/// - extents are keyed and iterated by `start`
///
/// Equality compares the extent sequence, which is canonical because of
/// the coalescing invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<(u64, u64)>", try_from = "Vec<(u64, u64)>")]
pub struct IntervalSet {
    runs: BTreeMap<u64, Extent>,
}

impl IntervalSet {
    /// Create an empty set
    pub fn new() -> Self {
        IntervalSet {
            runs: BTreeMap::new(),
        }
    }

    /// Create a set holding a single run
    pub fn with_run(start: u64, length: u64) -> Self {
        let mut set = IntervalSet::new();
        set.add(start, length);
        set
    }

    /// Insert `length` values starting at `start`, merging with any
    /// overlapping or adjacent runs
    pub fn add(&mut self, start: u64, length: u64) {
        if length == 0 {
            return;
        }

        let mut merged = Extent::new(start, length);

        // A run starting at or before `start` may reach into the new one
        if let Some((&prev_start, prev)) = self.runs.range(..=start).next_back() {
            if let Some(c) = prev.coalesce(&merged) {
                merged = c;
                self.runs.remove(&prev_start);
            }
        }

        // Swallow every following run that starts inside or right after it
        loop {
            let next = self
                .runs
                .range(merged.start..)
                .next()
                .map(|(&k, e)| (k, *e));
            match next {
                Some((key, extent)) if extent.start <= merged.end() => {
                    merged = merged.coalesce(&extent).unwrap_or(merged);
                    self.runs.remove(&key);
                }
                _ => break,
            }
        }

        self.runs.insert(merged.start, merged);
    }

    /// Insert a single value
    pub fn insert(&mut self, value: u64) {
        self.add(value, 1);
    }

    /// Remove a single value, splitting its run if needed
    ///
    /// Returns `false` if the value was not present.
    pub fn remove(&mut self, value: u64) -> bool {
        let found = self
            .runs
            .range(..=value)
            .next_back()
            .map(|(_, e)| *e)
            .filter(|e| e.contains(value));

        let extent = match found {
            Some(e) => e,
            None => return false,
        };

        self.runs.remove(&extent.start);
        if value > extent.start {
            self.runs
                .insert(extent.start, Extent::new(extent.start, value - extent.start));
        }
        if value + 1 < extent.end() {
            self.runs
                .insert(value + 1, Extent::new(value + 1, extent.end() - (value + 1)));
        }
        true
    }

    /// Remove every value in `[start, start + length)`
    pub fn remove_range(&mut self, start: u64, length: u64) {
        if length == 0 {
            return;
        }
        let cut = Extent::new(start, length);

        let overlapping: Vec<Extent> = self
            .runs
            .range(..cut.end())
            .map(|(_, e)| *e)
            .filter(|e| e.end() > cut.start)
            .collect();

        for extent in overlapping {
            self.runs.remove(&extent.start);
            if extent.start < cut.start {
                self.runs
                    .insert(extent.start, Extent::new(extent.start, cut.start - extent.start));
            }
            if extent.end() > cut.end() {
                self.runs
                    .insert(cut.end(), Extent::new(cut.end(), extent.end() - cut.end()));
            }
        }
    }

    /// Remove every value of `other` from this set
    pub fn subtract(&mut self, other: &IntervalSet) {
        for extent in other.runs() {
            self.remove_range(extent.start, extent.length);
        }
    }

    /// Add every value of `other` to this set
    pub fn union(&mut self, other: &IntervalSet) {
        for extent in other.runs() {
            self.add(extent.start, extent.length);
        }
    }

    /// Check if a value is in the set
    pub fn contains(&self, value: u64) -> bool {
        self.runs
            .range(..=value)
            .next_back()
            .map(|(_, e)| e.contains(value))
            .unwrap_or(false)
    }

    /// Number of values in the set
    pub fn size(&self) -> u64 {
        self.runs.values().map(|e| e.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn min(&self) -> Option<u64> {
        self.runs.values().next().map(|e| e.start)
    }

    pub fn max(&self) -> Option<u64> {
        self.runs.values().next_back().map(|e| e.end() - 1)
    }

    /// Remove and return the smallest value
    pub fn pop_min(&mut self) -> Result<u64> {
        let value = self.min().ok_or(ArchiveError::EmptyIntervalSet)?;
        self.remove(value);
        Ok(value)
    }

    /// The runs in ascending order
    pub fn runs(&self) -> impl Iterator<Item = &Extent> + '_ {
        self.runs.values()
    }

    /// Number of runs (fragmentation indicator)
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Every value in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.runs.values().flat_map(|e| e.start..e.end())
    }
}

impl From<IntervalSet> for Vec<(u64, u64)> {
    fn from(set: IntervalSet) -> Self {
        set.runs.values().map(|e| (e.start, e.length)).collect()
    }
}

impl TryFrom<Vec<(u64, u64)>> for IntervalSet {
    type Error = String;

    fn try_from(pairs: Vec<(u64, u64)>) -> std::result::Result<Self, Self::Error> {
        let mut set = IntervalSet::new();
        for (start, length) in pairs {
            if length == 0 {
                return Err(format!("empty run at {}", start));
            }
            if start.checked_add(length).is_none() {
                return Err(format!("run at {} overflows", start));
            }
            set.add(start, length);
        }
        Ok(set)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, e) in self.runs.values().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if e.length == 1 {
                write!(f, "{}", e.start)?;
            } else {
                write!(f, "{}..{}", e.start, e.end() - 1)?;
            }
        }
        write!(f, "}}")
    }
}
