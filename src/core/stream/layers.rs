//! Cipher layers of the stream pipeline
//!
//! CTR keystreams keep the byte count unchanged, so these adapters can sit
//! anywhere in a `Read`/`Write` chain without framing.

use crate::core::cipher::Keystream;
use std::io::{self, Read, Write};

/// Encrypts everything written to it before passing it on
pub struct CipherWriter<W: Write> {
    inner: W,
    keystream: Option<Keystream>,
    scratch: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    /// `None` passes bytes through unchanged
    pub fn new(inner: W, keystream: Option<Keystream>) -> Self {
        CipherWriter {
            inner,
            keystream,
            scratch: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.keystream {
            None => self.inner.write(buf),
            Some(keystream) => {
                // the keystream has advanced past these bytes, so all of them
                // must reach the inner writer
                self.scratch.clear();
                self.scratch.extend_from_slice(buf);
                keystream.apply(&mut self.scratch);
                self.inner.write_all(&self.scratch)?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypts everything read through it
pub struct CipherReader<R: Read> {
    inner: R,
    keystream: Option<Keystream>,
}

impl<R: Read> CipherReader<R> {
    pub fn new(inner: R, keystream: Option<Keystream>) -> Self {
        CipherReader { inner, keystream }
    }
}

impl<R: Read> Read for CipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(keystream) = &mut self.keystream {
            keystream.apply(&mut buf[..n]);
        }
        Ok(n)
    }
}
