use super::block::BlockWriter;
use super::layers::CipherWriter;
use super::{from_io, WriteOptions};
use crate::core::allocator::extent::IntervalSet;
use crate::core::allocator::BlockAllocator;
use crate::core::cipher::{Encryption, Keystream};
use crate::core::compression::{CompressionMethod, Compressor};
use crate::core::context::ArchiveContext;
use crate::core::inventory::FileEntry;
use crate::core::io::ContainerFile;
use crate::error::Result;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tracing::{debug, error};

/// Stage chain below the digest
///
/// The compressor and cipher are only set up on the first non-empty write,
/// so an empty file ends up with no blocks at all.
enum Pipeline {
    Idle(BlockWriter),
    Active(Compressor<CipherWriter<BlockWriter>>),
    Done,
}

/// Sink for a file's new content
///
/// Plaintext is digested, compressed, encrypted and cut into blocks as it is
/// written. [`close`](Self::close) (or drop) pads the last block and updates
/// the file entry; persisting the inventory is up to the caller.
pub struct WriteStream<'a> {
    entry: &'a mut FileEntry,
    path: String,
    block_size: u32,
    encryption: Encryption,
    compression: CompressionMethod,
    parameters: Option<Vec<u8>>,
    pipeline: Pipeline,
    /// Blocks holding the content being replaced
    previous: IntervalSet,
    hasher: Sha256,
    plaintext_length: u64,
}

/// Open a write stream replacing the content of the file at `path`
///
/// Uses the file's current encryption and compression settings. Fresh
/// encryption parameters are drawn from `rng`.
pub fn open_write_stream<'a>(
    context: &'a mut ArchiveContext,
    path: &str,
    rng: &mut dyn RngCore,
) -> Result<WriteStream<'a>> {
    open_write_stream_with(context, path, WriteOptions::default(), rng)
}

/// Open a write stream with per-stream cipher and compression overrides
pub fn open_write_stream_with<'a>(
    context: &'a mut ArchiveContext,
    path: &str,
    options: WriteOptions,
    rng: &mut dyn RngCore,
) -> Result<WriteStream<'a>> {
    let block_size = context.block_size();
    let container = ContainerFile::open(context.path())?;

    let previous = context.inventory.file(path)?.blocks.clone();
    let mut allocator = BlockAllocator::new(&context.inventory, &IntervalSet::new());
    allocator.release(&previous);

    let entry = context.inventory.file_mut(path)?;
    let encryption = options.encryption.unwrap_or(entry.encryption);
    let compression = options.compression.unwrap_or(entry.compression);
    let parameters = encryption.generate_parameters(rng);

    debug!(
        "Opened write stream for {} ({:?}, {:?}, reusing {} blocks)",
        path,
        encryption,
        compression,
        previous.size()
    );

    Ok(WriteStream {
        entry,
        path: path.to_string(),
        block_size,
        encryption,
        compression,
        parameters,
        pipeline: Pipeline::Idle(BlockWriter::new(container, block_size, allocator, previous.clone())),
        previous,
        hasher: Sha256::new(),
        plaintext_length: 0,
    })
}

impl WriteStream<'_> {
    /// Plaintext bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.plaintext_length
    }

    fn activate(&mut self) -> io::Result<()> {
        let blocks = match std::mem::replace(&mut self.pipeline, Pipeline::Done) {
            Pipeline::Idle(blocks) => blocks,
            other => {
                self.pipeline = other;
                return Ok(());
            }
        };

        let keystream = Keystream::from_parameters(self.encryption, self.parameters.as_deref())
            .map_err(io::Error::other)?;
        let compressor = self
            .compression
            .encoder(CipherWriter::new(blocks, keystream))?;
        self.pipeline = Pipeline::Active(compressor);
        Ok(())
    }

    /// Flush the last block and record the new content on the file entry
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    /// Blocks of the replaced content that already hold new data
    ///
    /// Until the stream closes, the file entry still describes the old
    /// content, so these blocks no longer match its digest.
    pub fn overwritten_blocks(&self) -> u64 {
        let written = match &self.pipeline {
            Pipeline::Idle(blocks) => blocks.written(),
            Pipeline::Active(compressor) => compressor.get_ref().get_ref().written(),
            Pipeline::Done => return 0,
        };
        let mut untouched = self.previous.clone();
        untouched.subtract(written);
        self.previous.size() - untouched.size()
    }

    fn finish(&mut self) -> Result<()> {
        let overwritten = self.overwritten_blocks();
        let finished = match std::mem::replace(&mut self.pipeline, Pipeline::Done) {
            Pipeline::Done => return Ok(()),
            Pipeline::Idle(blocks) => blocks.finish(),
            Pipeline::Active(compressor) => compressor
                .finish()
                .map_err(from_io)
                .and_then(|cipher| cipher.into_inner().finish()),
        };
        let blocks = match finished {
            Ok(blocks) => blocks,
            Err(e) => {
                if overwritten > 0 {
                    error!(
                        "Write to {} failed after overwriting {} of its {} previous blocks; \
                         the stored digest no longer matches until the file is rewritten",
                        self.path,
                        overwritten,
                        self.previous.size()
                    );
                }
                return Err(e);
            }
        };

        let entry = &mut *self.entry;
        entry.size_on_disk = blocks.size() * self.block_size as u64;
        entry.blocks = blocks;
        entry.actual_size = self.plaintext_length;
        entry.integrity_hash = Some(self.hasher.finalize_reset().to_vec());
        entry.encryption = self.encryption;
        entry.encryption_data = self.parameters.take();
        entry.compression = self.compression;
        entry.touch();

        debug!(
            "Closed write stream for {}: {} bytes in {} blocks",
            self.path,
            entry.actual_size,
            entry.blocks.size()
        );
        Ok(())
    }
}

impl Write for WriteStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.activate()?;

        let Pipeline::Active(compressor) = &mut self.pipeline else {
            return Err(io::Error::other("write stream already closed"));
        };
        compressor.write_all(buf)?;
        self.hasher.update(buf);
        self.plaintext_length += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.pipeline {
            Pipeline::Active(compressor) => compressor.flush(),
            _ => Ok(()),
        }
    }
}

impl Drop for WriteStream<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("Failed to finalize write stream for {}: {}", self.path, e);
        }
    }
}
