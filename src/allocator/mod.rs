//! Block allocation for container payloads
//!
//! Free space is tracked by a singly linked list whose records live inside
//! the container file itself (see [`free_list`]). Requests are served
//! first-fit from the list, splitting oversized blocks in place, and fall
//! back to a reservation past the container's high-water mark.

pub mod extent;
pub mod free_list;

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use extent::Extent;
pub use free_list::{FreeBlock, FreeList, FreeListHeader, RecordSlot};

/// Alignment of blocks reserved at the end of the container
pub const DATA_ALIGNMENT: u32 = 4096;

/// A free block is split only when it exceeds the request by more than this
pub const SPLIT_THRESHOLD: u32 = 16;

/// Block allocator trait
///
/// Offsets handed out are byte positions in the container file; callers
/// treat them as opaque handles and return them with the same size they
/// asked for.
pub trait BlockAllocator {
    /// Find space for `size` bytes and return its offset
    fn allocate(&mut self, size: u32) -> Result<u32>;

    /// Return a previously allocated region
    fn free(&mut self, offset: u32, size: u32) -> Result<()>;

    /// Coalesce touching free extents
    fn defragment(&mut self) -> Result<DefragReport>;

    /// Free blocks in list order
    fn free_blocks(&mut self) -> Result<Vec<FreeBlock>>;
}

/// Outcome of a [`BlockAllocator::defragment`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefragReport {
    pub blocks_before: u32,
    pub blocks_after: u32,
    pub free_bytes: u64,
}
