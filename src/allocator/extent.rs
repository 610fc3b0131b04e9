//! Byte extents and coalescing

use serde::{Deserialize, Serialize};

/// A contiguous byte range in the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First byte of the range
    pub offset: u32,
    /// Length in bytes
    pub size: u32,
}

impl Extent {
    pub fn new(offset: u32, size: u32) -> Self {
        Extent { offset, size }
    }

    /// One past the last byte
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.size)
    }

    /// Check if the two extents share at least one byte
    pub fn overlaps(&self, other: &Extent) -> bool {
        u64::from(self.offset) < other.end() && u64::from(other.offset) < self.end()
    }

    /// Check if this extent is adjacent to another (can be coalesced)
    pub fn is_adjacent(&self, other: &Extent) -> bool {
        self.end() == u64::from(other.offset) || other.end() == u64::from(self.offset)
    }

    /// Coalesce two adjacent extents
    pub fn coalesce(&self, other: &Extent) -> Option<Extent> {
        if !self.is_adjacent(other) {
            return None;
        }

        let start = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        let size = u32::try_from(end - u64::from(start)).ok()?;

        Some(Extent::new(start, size))
    }
}

/// Sort extents by offset and merge every touching pair
///
/// A merge re-checks the grown extent against its new neighbour, so chains
/// of adjacent extents collapse into one.
pub fn coalesce(mut extents: Vec<Extent>) -> Vec<Extent> {
    extents.sort_by_key(|extent| extent.offset);

    let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
    for extent in extents {
        if let Some(last) = merged.last_mut() {
            if last.end() == u64::from(extent.offset) {
                if let Some(joined) = last.coalesce(&extent) {
                    *last = joined;
                    continue;
                }
            }
        }
        merged.push(extent);
    }

    merged
}
