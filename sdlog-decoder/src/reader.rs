//! Byte cursor over a seekable log source
//!
//! `FrameReader` tracks the absolute file offset and the total length so the
//! entry decoder can tell "not enough bytes left" apart from I/O failures, and
//! performs the byte-by-byte sync search after a lost entry boundary.

use crate::types::{DecoderError, Diagnostic, Result, SYNC_BYTE};
use byteorder::ReadBytesExt;
use std::io::{Read, Seek, SeekFrom};

/// Skips up to this many bytes are read rather than seeked over
const SHORT_SKIP: usize = 64;

/// Outcome of a sync byte search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resync {
    /// Cursor now sits on a sync byte at this offset
    Found(u64),
    /// End of file reached without finding a sync byte
    EndOfFile,
    /// The search window ran out before a sync byte was found
    WindowExhausted,
}

/// Cursor over the underlying byte source
pub struct FrameReader<R> {
    inner: R,
    position: u64,
    len: u64,
}

impl<R: Read + Seek> FrameReader<R> {
    /// Wrap a source, measuring its length and rewinding to offset 0
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            position: 0,
            len,
        })
    }

    /// Current byte offset
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total length of the source
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes left between the cursor and end of file
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    /// Read exactly `n` bytes
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` completely from the current position
    pub fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure_available(buf.len() as u64)?;
        self.inner.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Advance the cursor by `n` bytes without reading them
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if n <= SHORT_SKIP as u64 {
            // Seeking would discard a buffered reader's buffer
            let mut scratch = [0u8; SHORT_SKIP];
            return self.fill(&mut scratch[..n as usize]);
        }
        self.ensure_available(n)?;
        self.seek_to(self.position + n)
    }

    /// Move the cursor to an absolute offset
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    /// Scan forward one byte at a time for the next sync byte
    ///
    /// Every byte passed over is pushed to `diagnostics` as a
    /// [`Diagnostic::Desync`]. On success the cursor is left on the sync byte.
    /// `window` bounds the number of bytes skipped; `None` scans to EOF.
    pub fn resynchronize(
        &mut self,
        window: Option<u64>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Resync> {
        let start = self.position;
        let mut scanned = 0u64;

        while self.remaining() > 0 {
            if window.is_some_and(|limit| scanned >= limit) {
                return Ok(Resync::WindowExhausted);
            }

            let offset = self.position;
            let byte = self.inner.read_u8()?;
            self.position += 1;

            if byte == SYNC_BYTE {
                self.seek_to(offset)?;
                log::debug!(
                    "Resynchronized at 0x{:X} after skipping {} bytes from 0x{:X}",
                    offset,
                    scanned,
                    start
                );
                return Ok(Resync::Found(offset));
            }

            log::trace!("Skipping byte 0x{:02X} at 0x{:X}", byte, offset);
            diagnostics.push(Diagnostic::Desync { offset, byte });
            scanned += 1;
        }

        log::debug!(
            "No sync byte found after 0x{:X} ({} bytes skipped)",
            start,
            scanned
        );
        Ok(Resync::EndOfFile)
    }

    fn ensure_available(&self, needed: u64) -> Result<()> {
        let available = self.remaining();
        if available < needed {
            return Err(DecoderError::UnexpectedEof {
                offset: self.position,
                needed,
                available,
            });
        }
        Ok(())
    }
}
