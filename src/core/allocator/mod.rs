//! Block allocation for the data region
//!
//! The set of used blocks is never persisted on its own. It is rebuilt from
//! the inventory (the union of every file's block range) whenever a writer
//! needs fresh blocks, so deleting a file from the tree is all it takes to
//! make its blocks reusable.

pub mod extent;

use crate::core::header::HEADER_SIZE;
use crate::core::inventory::Inventory;
use crate::error::{ArchiveError, Result};
use extent::IntervalSet;
use tracing::trace;

/// Number of blocks the data region must hold for this inventory
///
/// This is the highest used block id plus one. Holes below the last used
/// block are kept (they are reused by later writes); anything above it is
/// truncated away by the metadata writer.
pub fn calculate_used_blocks(inventory: &Inventory) -> u64 {
    inventory
        .files()
        .filter_map(|f| f.blocks.max())
        .max()
        .map(|m| m + 1)
        .unwrap_or(0)
}

/// Byte length of the data region for this inventory
///
/// Fails with `MalformedLength` when the region (plus the header in front
/// of it) would not fit in a `u64` file offset.
pub fn used_data_length(inventory: &Inventory, block_size: u32) -> Result<u64> {
    let blocks = calculate_used_blocks(inventory);
    blocks
        .checked_mul(block_size as u64)
        .filter(|length| length.checked_add(HEADER_SIZE).is_some())
        .ok_or_else(|| {
            ArchiveError::MalformedLength(format!(
                "{} blocks of {} bytes do not fit in a file",
                blocks, block_size
            ))
        })
}

/// Hands out block ids for one write session
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// Every block owned by a file or reserved by the caller
    used_blocks: IntervalSet,

    /// Blocks handed out by this allocator
    current_allocation: IntervalSet,

    /// Highest known block id plus one
    total_blocks: u64,
}

impl BlockAllocator {
    /// Build an allocator from every file in the inventory plus an extra
    /// reserved range
    pub fn new(inventory: &Inventory, reserved: &IntervalSet) -> Self {
        let mut used_blocks = reserved.clone();
        for file in inventory.files() {
            used_blocks.union(&file.blocks);
        }
        let total_blocks = used_blocks.max().map(|m| m + 1).unwrap_or(0);

        trace!(
            "Block allocator built: {} used blocks, total {}",
            used_blocks.size(),
            total_blocks
        );

        BlockAllocator {
            used_blocks,
            current_allocation: IntervalSet::new(),
            total_blocks,
        }
    }

    /// Make previously used blocks available again
    ///
    /// Used when a file is rewritten: its old blocks go back to the pool so
    /// the writer can reuse them. `total_blocks` is left alone, the released
    /// ids become holes below it.
    pub fn release(&mut self, blocks: &IntervalSet) {
        self.used_blocks.subtract(blocks);
        self.current_allocation.subtract(blocks);
    }

    /// Allocate a specific block id below `total_blocks`
    pub fn allocate_block(&mut self, id: u64) -> Result<u64> {
        if id >= self.total_blocks {
            return Err(ArchiveError::BlockOutOfRange {
                id,
                total: self.total_blocks,
            });
        }
        self.mark_used(id)
    }

    /// Allocate a specific block id, growing `total_blocks` to cover it
    pub fn allocate_block_extending(&mut self, id: u64) -> Result<u64> {
        if id >= self.total_blocks {
            trace!("Growing block total from {} to {}", self.total_blocks, id + 1);
            self.total_blocks = id + 1;
        }
        self.mark_used(id)
    }

    /// Allocate the lowest free block, growing the region only when there
    /// is no hole to reuse
    pub fn allocate_next_block(&mut self) -> Result<u64> {
        let id = self.next_allocatable_block_id();
        self.allocate_block_extending(id)
    }

    /// The id `allocate_next_block` would return, without allocating it
    pub fn next_allocatable_block_id(&self) -> u64 {
        let mut candidate = 0;
        for extent in self.used_blocks.runs() {
            if candidate < extent.start {
                break;
            }
            candidate = extent.end();
        }
        candidate
    }

    /// Blocks handed out by this allocator so far
    pub fn current_allocation(&self) -> &IntervalSet {
        &self.current_allocation
    }

    /// Every block currently considered in use
    pub fn used_blocks(&self) -> &IntervalSet {
        &self.used_blocks
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn mark_used(&mut self, id: u64) -> Result<u64> {
        if self.used_blocks.contains(id) {
            return Err(ArchiveError::BlockAlreadyAllocated(id));
        }
        self.used_blocks.insert(id);
        self.current_allocation.insert(id);
        Ok(id)
    }
}
