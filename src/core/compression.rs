//! Streaming compression for file content
//!
//! Provides LZ4 (frame format) and Zstd compression as `Write`/`Read`
//! adapters so they can sit between the plaintext digest and the cipher
//! layer of the stream pipeline.
//!
//! **Design**:
//! - The method is recorded per file, so files written with different
//!   settings can live in the same archive
//! - Decoders stop at the end of their frame; the zero padding of the last
//!   block is never interpreted
//! - `None` is a zero-cost passthrough

use serde::{Deserialize, Serialize};
use std::io::{self, BufReader, Read, Write};

/// Zstd level used for content (same tradeoff as the default CLI level)
const ZSTD_LEVEL: i32 = 3;

/// Compression method for file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionMethod {
    /// No compression
    #[default]
    None,
    /// LZ4 compression (fast, moderate ratio)
    Lz4,
    /// Zstd compression (slower, better ratio)
    Zstd,
}

impl CompressionMethod {
    /// Wrap a sink with this method's encoder
    pub fn encoder<W: Write>(self, inner: W) -> io::Result<Compressor<W>> {
        Ok(match self {
            CompressionMethod::None => Compressor::None(inner),
            CompressionMethod::Lz4 => Compressor::Lz4(lz4_flex::frame::FrameEncoder::new(inner)),
            CompressionMethod::Zstd => {
                Compressor::Zstd(zstd::stream::write::Encoder::new(inner, ZSTD_LEVEL)?)
            }
        })
    }

    /// Wrap a source with this method's decoder
    pub fn decoder<R: Read>(self, inner: R) -> io::Result<Decompressor<R>> {
        Ok(match self {
            CompressionMethod::None => Decompressor::None(inner),
            CompressionMethod::Lz4 => Decompressor::Lz4(lz4_flex::frame::FrameDecoder::new(inner)),
            CompressionMethod::Zstd => {
                Decompressor::Zstd(zstd::stream::read::Decoder::new(inner)?.single_frame())
            }
        })
    }
}

/// Compressing sink
pub enum Compressor<W: Write> {
    None(W),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    pub fn get_ref(&self) -> &W {
        match self {
            Compressor::None(w) => w,
            Compressor::Lz4(e) => e.get_ref(),
            Compressor::Zstd(e) => e.get_ref(),
        }
    }

    /// Flush the trailing frame and hand back the inner sink
    pub fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::Lz4(e) => e.finish().map_err(io::Error::other),
            Compressor::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::None(w) => w.write(buf),
            Compressor::Lz4(e) => e.write(buf),
            Compressor::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::None(w) => w.flush(),
            Compressor::Lz4(e) => e.flush(),
            Compressor::Zstd(e) => e.flush(),
        }
    }
}

/// Decompressing source
pub enum Decompressor<R: Read> {
    None(R),
    Lz4(lz4_flex::frame::FrameDecoder<R>),
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::None(r) => r.read(buf),
            Decompressor::Lz4(d) => d.read(buf),
            Decompressor::Zstd(d) => d.read(buf),
        }
    }
}
