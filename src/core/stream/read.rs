use super::block::BlockReader;
use super::layers::CipherReader;
use super::from_io;
use crate::core::cipher::Keystream;
use crate::core::compression::Decompressor;
use crate::core::context::ArchiveContext;
use crate::core::inventory::FileEntry;
use crate::error::{ArchiveError, Result};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Take};
use tracing::{debug, warn};

/// Source of a file's plaintext
///
/// Blocks are read lowest id first, decrypted, decompressed and cut off at
/// the file's actual size. With verification on, the plaintext digest is
/// compared on [`close`](Self::close); a mismatch is only ever reported
/// there.
pub struct ReadStream<'a> {
    entry: &'a FileEntry,
    path: String,
    source: Take<Decompressor<CipherReader<BlockReader>>>,
    hasher: Option<Sha256>,
    produced: u64,
}

/// Open a read stream for the file at `path`
pub fn open_read_stream<'a>(
    context: &'a ArchiveContext,
    path: &str,
    verify_integrity: bool,
) -> Result<ReadStream<'a>> {
    let entry = context.inventory.file(path)?;

    let blocks = BlockReader::open(context.path(), context.block_size(), &entry.blocks)?;
    let keystream = Keystream::from_parameters(entry.encryption, entry.encryption_data.as_deref())?;
    let decompressor = entry.compression.decoder(CipherReader::new(blocks, keystream))?;

    debug!(
        "Opened read stream for {} ({} bytes, verify: {})",
        path, entry.actual_size, verify_integrity
    );

    Ok(ReadStream {
        entry,
        path: path.to_string(),
        source: decompressor.take(entry.actual_size),
        hasher: verify_integrity.then(Sha256::new),
        produced: 0,
    })
}

impl ReadStream<'_> {
    /// The entry being read
    pub fn entry(&self) -> &FileEntry {
        self.entry
    }

    /// Plaintext bytes produced so far
    pub fn bytes_read(&self) -> u64 {
        self.produced
    }

    /// Finish the stream, checking the digest if verification is on
    ///
    /// Unread content is consumed first so the digest covers the whole file.
    pub fn close(mut self) -> Result<()> {
        let Some(mut hasher) = self.hasher.take() else {
            return Ok(());
        };

        let mut rest = [0u8; 8192];
        loop {
            let n = self.source.read(&mut rest).map_err(from_io)?;
            if n == 0 {
                break;
            }
            hasher.update(&rest[..n]);
            self.produced += n as u64;
        }

        let digest = hasher.finalize();
        let matches = self.produced == self.entry.actual_size
            && self
                .entry
                .integrity_hash
                .as_deref()
                .is_some_and(|stored| stored == digest.as_slice());
        if !matches {
            warn!("Integrity check failed for {}", self.path);
            return Err(ArchiveError::IntegrityMismatch { path: self.path });
        }
        Ok(())
    }
}

impl Read for ReadStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read(buf)?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&buf[..n]);
        }
        self.produced += n as u64;
        Ok(n)
    }
}
