//! Layered streams moving file content in and out of the data region
//!
//! Write side, top to bottom:
//!
//! ```text
//! plaintext -> SHA-256 digest -> compression -> CTR cipher -> block buffer -> container
//! ```
//!
//! The read side mirrors it, pulling blocks in ascending id order and
//! stopping at the file's actual size so the padding of the last block is
//! never returned.

pub mod block;
pub mod layers;
mod read;
mod write;

pub use read::{open_read_stream, ReadStream};
pub use write::{open_write_stream, open_write_stream_with, WriteStream};

use crate::core::cipher::Encryption;
use crate::core::compression::CompressionMethod;
use crate::error::ArchiveError;
use std::io;

/// Per-stream overrides of a file's stored settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub encryption: Option<Encryption>,
    pub compression: Option<CompressionMethod>,
}

impl WriteOptions {
    pub fn encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = Some(compression);
        self
    }
}

/// Recover an archive error that travelled through an `io::Error`
pub(crate) fn from_io(e: io::Error) -> ArchiveError {
    let wraps_archive_error = e
        .get_ref()
        .is_some_and(|inner| inner.is::<ArchiveError>());
    if !wraps_archive_error {
        return ArchiveError::Io(e);
    }

    match e.into_inner().map(|inner| inner.downcast::<ArchiveError>()) {
        Some(Ok(inner)) => *inner,
        _ => ArchiveError::Io(io::Error::other("stream error lost while unwrapping")),
    }
}
