//! In-file free list
//!
//! The list header sits at [`FREE_LIST_OFFSET`]: a record count and the slot
//! of the first record. Each record is 12 bytes `{offset, size, next_free}`
//! stored at its own slot, with `next_free == 0` ending the list. Slots are
//! addressed through [`RecordSlot`] so list links are never confused with
//! payload offsets.

use crate::allocator::extent::{self, Extent};
use crate::allocator::{BlockAllocator, DefragReport, DATA_ALIGNMENT, SPLIT_THRESHOLD};
use crate::error::{ContainerError, Result};
use crate::header::{le_u32, FREE_LIST_OFFSET};
use crate::io::ContainerFile;
use tracing::{debug, info};

/// Size of one free-block record
pub const RECORD_SIZE: u32 = 12;

/// Position of a free-block record in the container file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordSlot(u32);

impl RecordSlot {
    /// Decode a stored link; zero is the end-of-list marker
    pub fn from_link(position: u32) -> Option<Self> {
        (position != 0).then_some(RecordSlot(position))
    }

    pub fn position(self) -> u32 {
        self.0
    }

    fn to_link(slot: Option<RecordSlot>) -> u32 {
        slot.map_or(0, |s| s.0)
    }
}

/// Free-list header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeListHeader {
    /// Number of records reachable from `head`
    pub count: u32,
    /// First record, `None` for an empty list
    pub head: Option<RecordSlot>,
}

/// Free-block record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub offset: u32,
    pub size: u32,
    pub next_free: Option<RecordSlot>,
}

impl FreeBlock {
    pub fn extent(&self) -> Extent {
        Extent::new(self.offset, self.size)
    }

    fn to_bytes(&self) -> [u8; RECORD_SIZE as usize] {
        let mut bytes = [0u8; RECORD_SIZE as usize];
        bytes[0..4].copy_from_slice(&self.offset.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8..12].copy_from_slice(&RecordSlot::to_link(self.next_free).to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        FreeBlock {
            offset: le_u32(bytes, 0),
            size: le_u32(bytes, 4),
            next_free: RecordSlot::from_link(le_u32(bytes, 8)),
        }
    }
}

/// Allocator view over a container's free list
///
/// Borrows the container file for the duration of one or more allocator
/// calls. All state lives in the file; nothing is cached between calls.
pub struct FreeList<'a> {
    file: &'a mut ContainerFile,
}

impl<'a> FreeList<'a> {
    pub fn new(file: &'a mut ContainerFile) -> Self {
        FreeList { file }
    }

    /// Write an empty list header (new containers)
    pub fn initialize(&mut self) -> Result<()> {
        self.write_header(&FreeListHeader::default())
    }

    /// Read the list header
    pub fn header(&mut self) -> Result<FreeListHeader> {
        let bytes = self.file.read_at(u64::from(FREE_LIST_OFFSET), 8)?;
        Ok(FreeListHeader {
            count: le_u32(&bytes, 0),
            head: RecordSlot::from_link(le_u32(&bytes, 4)),
        })
    }

    fn write_header(&mut self, header: &FreeListHeader) -> Result<()> {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&header.count.to_le_bytes());
        bytes[4..8].copy_from_slice(&RecordSlot::to_link(header.head).to_le_bytes());
        self.file.write_at(u64::from(FREE_LIST_OFFSET), &bytes)
    }

    fn read_record(&mut self, slot: RecordSlot) -> Result<FreeBlock> {
        let end = u64::from(slot.0) + u64::from(RECORD_SIZE);
        if end > self.file.len()? {
            return Err(ContainerError::CorruptFreeList(format!(
                "record slot {} lies outside the file",
                slot.0
            )));
        }

        let bytes = self.file.read_at(u64::from(slot.0), RECORD_SIZE as usize)?;
        Ok(FreeBlock::from_bytes(&bytes))
    }

    fn write_record(&mut self, slot: RecordSlot, block: &FreeBlock) -> Result<()> {
        self.file.write_at(u64::from(slot.0), &block.to_bytes())
    }

    /// Rewrite only the `next_free` link of the record at `slot`
    fn write_link(&mut self, slot: RecordSlot, next: Option<RecordSlot>) -> Result<()> {
        let link = RecordSlot::to_link(next).to_le_bytes();
        self.file.write_at(u64::from(slot.0) + 8, &link)
    }

    /// Reserve room for `records` contiguous bookkeeping records
    ///
    /// Bookkeeping slots come from the high-water mark, aligned to the
    /// record size, and are never reclaimed.
    fn find_space_for_free_block(&mut self, records: u32) -> Result<RecordSlot> {
        let bytes = records
            .checked_mul(RECORD_SIZE)
            .ok_or(ContainerError::OutOfSpace)?;
        let position = self.file.reserve(bytes, RECORD_SIZE)?;

        RecordSlot::from_link(position).ok_or_else(|| {
            ContainerError::CorruptFreeList("record slot reserved at offset 0".to_string())
        })
    }

    /// Collect every record, failing if the chain is longer than the count
    fn walk(&mut self, header: &FreeListHeader) -> Result<Vec<(RecordSlot, FreeBlock)>> {
        let mut nodes = Vec::new();
        let mut current = header.head;

        while let Some(slot) = current {
            if nodes.len() as u64 >= u64::from(header.count) {
                return Err(chain_too_long(header.count));
            }
            let block = self.read_record(slot)?;
            nodes.push((slot, block));
            current = block.next_free;
        }

        if (nodes.len() as u64) < u64::from(header.count) {
            debug!(
                "Free list holds {} records but header counts {}",
                nodes.len(),
                header.count
            );
        }

        Ok(nodes)
    }
}

fn chain_too_long(count: u32) -> ContainerError {
    ContainerError::CorruptFreeList(format!(
        "chain is longer than its count of {} (cycle or stale count)",
        count
    ))
}

impl BlockAllocator for FreeList<'_> {
    fn allocate(&mut self, size: u32) -> Result<u32> {
        let mut header = self.header()?;
        let mut previous: Option<RecordSlot> = None;
        let mut current = header.head;
        let mut visited = 0u32;

        while let Some(slot) = current {
            visited += 1;
            if visited > header.count {
                return Err(chain_too_long(header.count));
            }

            let block = self.read_record(slot)?;
            if block.size >= size {
                if block.size > size.saturating_add(SPLIT_THRESHOLD) {
                    // Hand out the front, keep the tail in the same slot
                    let remainder = FreeBlock {
                        offset: block.offset.checked_add(size).ok_or_else(|| {
                            ContainerError::CorruptFreeList(format!(
                                "block at {} overflows the offset space",
                                block.offset
                            ))
                        })?,
                        size: block.size - size,
                        next_free: block.next_free,
                    };
                    self.write_record(slot, &remainder)?;
                    debug!(
                        "Split free block at {}: {} bytes used, {} left at {}",
                        block.offset, size, remainder.size, remainder.offset
                    );
                } else {
                    match previous {
                        Some(prev) => self.write_link(prev, block.next_free)?,
                        None => header.head = block.next_free,
                    }
                    header.count = header.count.saturating_sub(1);
                    self.write_header(&header)?;
                    debug!(
                        "Took whole free block at {} ({} bytes for a {} byte request)",
                        block.offset, block.size, size
                    );
                }

                return Ok(block.offset);
            }

            previous = Some(slot);
            current = block.next_free;
        }

        let offset = self.file.reserve(size, DATA_ALIGNMENT)?;
        debug!("No free block fits {} bytes, reserved at end: {}", size, offset);

        Ok(offset)
    }

    fn free(&mut self, offset: u32, size: u32) -> Result<()> {
        let mut header = self.header()?;
        let slot = self.find_space_for_free_block(1)?;

        let block = FreeBlock {
            offset,
            size,
            next_free: header.head,
        };
        self.write_record(slot, &block)?;

        header.count = header.count.checked_add(1).ok_or_else(|| chain_too_long(header.count))?;
        header.head = Some(slot);
        self.write_header(&header)?;

        debug!(
            "Freed {} bytes at {} (record slot {}, {} free blocks)",
            size, offset, slot.0, header.count
        );

        Ok(())
    }

    fn defragment(&mut self) -> Result<DefragReport> {
        let header = self.header()?;
        let nodes = self.walk(&header)?;
        let blocks_before = nodes.len() as u32;

        let merged = extent::coalesce(nodes.iter().map(|(_, block)| block.extent()).collect());
        let free_bytes = merged.iter().map(|e| u64::from(e.size)).sum();

        let new_header = if merged.is_empty() {
            FreeListHeader::default()
        } else {
            let count = merged.len() as u32;
            let first = self.find_space_for_free_block(count)?;

            let mut bytes = Vec::with_capacity((count * RECORD_SIZE) as usize);
            for (i, extent) in merged.iter().enumerate() {
                let next = if i + 1 < merged.len() {
                    RecordSlot::from_link(first.0 + (i as u32 + 1) * RECORD_SIZE)
                } else {
                    None
                };
                let block = FreeBlock {
                    offset: extent.offset,
                    size: extent.size,
                    next_free: next,
                };
                bytes.extend_from_slice(&block.to_bytes());
            }
            self.file.write_at(u64::from(first.0), &bytes)?;

            FreeListHeader {
                count,
                head: Some(first),
            }
        };
        self.write_header(&new_header)?;

        info!(
            "Defragmented free list: {} -> {} blocks, {} bytes free",
            blocks_before, new_header.count, free_bytes
        );

        Ok(DefragReport {
            blocks_before,
            blocks_after: new_header.count,
            free_bytes,
        })
    }

    fn free_blocks(&mut self) -> Result<Vec<FreeBlock>> {
        let header = self.header()?;
        Ok(self
            .walk(&header)?
            .into_iter()
            .map(|(_, block)| block)
            .collect())
    }
}
