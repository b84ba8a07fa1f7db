//! Block-level sink and source at the bottom of the stream pipeline

use crate::core::allocator::extent::IntervalSet;
use crate::core::allocator::BlockAllocator;
use crate::core::header::{block_offset, HEADER_SIZE};
use crate::core::io::ContainerFile;
use crate::error::{ArchiveError, Result};
use memmap2::Mmap;
use std::io::{self, Read, Write};
use std::ops::Range;
use std::path::Path;
use tracing::trace;

/// Buffers one block of stored bytes and writes it out when full
///
/// Block ids come from the file's previous blocks first (ascending), then
/// from the allocator, so rewriting a file of the same size touches the
/// same region of the container.
pub struct BlockWriter {
    container: ContainerFile,
    block_size: u32,
    allocator: BlockAllocator,
    reusable: IntervalSet,
    written: IntervalSet,
    buffer: Vec<u8>,
}

impl BlockWriter {
    /// `allocator` must already have `reusable` released
    pub fn new(
        container: ContainerFile,
        block_size: u32,
        allocator: BlockAllocator,
        reusable: IntervalSet,
    ) -> Self {
        BlockWriter {
            container,
            block_size,
            allocator,
            reusable,
            written: IntervalSet::new(),
            buffer: Vec::with_capacity(block_size as usize),
        }
    }

    /// Blocks written so far
    pub fn written(&self) -> &IntervalSet {
        &self.written
    }

    fn next_block_id(&mut self) -> Result<u64> {
        match self.reusable.pop_min() {
            Ok(id) => self.allocator.allocate_block(id),
            Err(_) => self.allocator.allocate_next_block(),
        }
    }

    fn flush_block(&mut self) -> Result<()> {
        let id = self.next_block_id()?;
        self.buffer.resize(self.block_size as usize, 0);
        self.container.write_block(self.block_size, id, &self.buffer)?;
        self.written.insert(id);
        self.buffer.clear();
        trace!("Wrote block {}", id);
        Ok(())
    }

    /// Pad and write the partial last block, returning the blocks used
    pub fn finish(mut self) -> Result<IntervalSet> {
        if !self.buffer.is_empty() {
            self.flush_block()?;
        }
        Ok(self.written)
    }
}

impl Write for BlockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.block_size as usize - self.buffer.len();
        let take = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);

        if self.buffer.len() == self.block_size as usize {
            self.flush_block().map_err(io::Error::other)?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        // only whole blocks are ever written; the partial one waits for finish
        Ok(())
    }
}

/// Streams a file's blocks out of a memory-mapped container, lowest id first
pub struct BlockReader {
    map: Option<Mmap>,
    block_size: usize,
    remaining: IntervalSet,
    current: Range<usize>,
}

impl BlockReader {
    pub fn open(path: &Path, block_size: u32, blocks: &IntervalSet) -> Result<Self> {
        // an empty file has nothing to map
        let map = if blocks.is_empty() {
            None
        } else {
            let container = ContainerFile::open_read_only(path)?;
            // SAFETY: the container is only written through a mutably borrowed
            // context, which cannot coexist with the shared borrow a read
            // stream holds
            Some(unsafe { Mmap::map(container.as_file())? })
        };

        Ok(BlockReader {
            map,
            block_size: block_size as usize,
            remaining: blocks.clone(),
            current: 0..0,
        })
    }

    fn next_block(&mut self, map_len: usize) -> Result<bool> {
        let id = match self.remaining.pop_min() {
            Ok(id) => id,
            Err(_) => return Ok(false),
        };

        let start = block_offset(self.block_size as u32, id) as usize;
        let end = start + self.block_size;
        if end > map_len {
            let present = map_len.saturating_sub(HEADER_SIZE as usize) / self.block_size;
            return Err(ArchiveError::BlockOutOfRange {
                id,
                total: present as u64,
            });
        }
        self.current = start..end;
        Ok(true)
    }
}

impl Read for BlockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let map_len = match &self.map {
            Some(map) => map.len(),
            None => return Ok(0),
        };

        if self.current.is_empty() && !self.next_block(map_len).map_err(io::Error::other)? {
            return Ok(0);
        }

        let n = self.current.len().min(buf.len());
        if let Some(map) = &self.map {
            buf[..n].copy_from_slice(&map[self.current.start..self.current.start + n]);
        }
        self.current.start += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::Header;
    use crate::core::inventory::{FileEntry, Inventory};
    use tempfile::NamedTempFile;

    fn writer_for(temp: &NamedTempFile, inventory: &Inventory, reusable: IntervalSet) -> BlockWriter {
        let container = ContainerFile::open(temp.path()).unwrap();
        let mut allocator = BlockAllocator::new(inventory, &IntervalSet::new());
        allocator.release(&reusable);
        BlockWriter::new(container, 256, allocator, reusable)
    }

    #[test]
    fn test_writes_full_and_padded_blocks() {
        let temp = NamedTempFile::new().unwrap();
        ContainerFile::create(temp.path(), &Header::new(256)).unwrap();

        let mut writer = writer_for(&temp, &Inventory::default(), IntervalSet::new());
        writer.write_all(&vec![7u8; 600]).unwrap();
        let blocks = writer.finish().unwrap();

        assert_eq!(blocks, IntervalSet::with_run(0, 3));
        let bytes = std::fs::read(temp.path()).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_SIZE + 3 * 256);
        assert!(bytes[HEADER_SIZE as usize..HEADER_SIZE as usize + 600]
            .iter()
            .all(|b| *b == 7));
        assert!(bytes[HEADER_SIZE as usize + 600..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_reuses_previous_blocks_first() {
        let temp = NamedTempFile::new().unwrap();
        ContainerFile::create(temp.path(), &Header::new(256)).unwrap();

        let mut inventory = Inventory::default();
        let mut other = FileEntry::new("other");
        other.blocks = IntervalSet::with_run(0, 2);
        inventory.root.files.push(other);
        let mut previous = FileEntry::new("previous");
        previous.blocks = IntervalSet::with_run(2, 1);
        previous.blocks.insert(5);
        inventory.root.files.push(previous.clone());

        let mut writer = writer_for(&temp, &inventory, previous.blocks.clone());
        writer.write_all(&vec![1u8; 256 * 3]).unwrap();
        let blocks = writer.finish().unwrap();

        // 2 and 5 are reused, then the lowest hole (3)
        let mut expected = IntervalSet::with_run(2, 2);
        expected.insert(5);
        assert_eq!(blocks, expected);
    }

    #[test]
    fn test_reader_follows_ascending_ids() {
        let temp = NamedTempFile::new().unwrap();
        let mut container = ContainerFile::create(temp.path(), &Header::new(256)).unwrap();
        for id in 0..4u8 {
            container.write_block(256, id as u64, &[id; 256]).unwrap();
        }

        let mut blocks = IntervalSet::new();
        blocks.insert(3);
        blocks.insert(1);
        let mut reader = BlockReader::open(temp.path(), 256, &blocks).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out.len(), 512);
        assert!(out[..256].iter().all(|b| *b == 1));
        assert!(out[256..].iter().all(|b| *b == 3));
    }

    #[test]
    fn test_reader_rejects_missing_block() {
        let temp = NamedTempFile::new().unwrap();
        ContainerFile::create(temp.path(), &Header::new(256)).unwrap();

        let mut reader = BlockReader::open(temp.path(), 256, &IntervalSet::with_run(9, 1)).unwrap();
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_reader_for_empty_file() {
        let mut reader =
            BlockReader::open(Path::new("/nonexistent/never-opened"), 256, &IntervalSet::new()).unwrap();
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
    }
}
