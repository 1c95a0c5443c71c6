//! Entry framing
//!
//! Each entry is `header (16 bytes) | payload | padding to a multiple of 8`.
//! The producer writes no end marker, so running out of bytes while looking
//! for the next header is the normal end of a recording. Running out after a
//! valid sync byte has promised a payload is a truncated tail.

use crate::config::DecoderConfig;
use crate::reader::{FrameReader, Resync};
use crate::schema::EntryLayout;
use crate::types::{DecoderError, Diagnostic, Entry, EntryHeader, Result, SYNC_BYTE};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Seek};

/// A located entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Offset of the sync byte
    pub offset: u64,
    pub header: EntryHeader,
}

/// Decodes framed entries from a [`FrameReader`]
#[derive(Debug, Clone, Copy)]
pub struct EntryDecoder {
    layout: EntryLayout,
    resync_window: Option<u64>,
    max_payload_len: Option<u32>,
}

impl EntryDecoder {
    pub fn new(layout: EntryLayout, config: &DecoderConfig) -> Self {
        Self {
            layout,
            resync_window: config.resync_window,
            max_payload_len: config.max_payload_len,
        }
    }

    /// Decode an entry header from its raw bytes
    pub fn decode_header(&self, raw: &[u8]) -> EntryHeader {
        let layout = &self.layout;
        EntryHeader {
            sync: raw[layout.sync],
            entry_type: raw[layout.entry_type],
            reserved: layout
                .reserved
                .map(|offset| LittleEndian::read_u16(&raw[offset..]))
                .unwrap_or(0),
            payload_len: LittleEndian::read_u32(&raw[layout.payload_len..]),
            device_time_us: LittleEndian::read_u64(&raw[layout.device_time..]),
        }
    }

    /// Read the next entry, payload included
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn next_entry<R: Read + Seek>(
        &self,
        reader: &mut FrameReader<R>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<Entry>> {
        let Some(located) = self.locate(reader, diagnostics)? else {
            return Ok(None);
        };
        self.check_body(reader, &located)?;

        let payload = reader.read_exact(located.header.payload_len as usize)?;
        reader.skip(located.header.padding_len())?;

        log::trace!(
            "Entry at 0x{:X}: type {}, {} bytes, t={} us",
            located.offset,
            located.header.entry_type,
            located.header.payload_len,
            located.header.device_time_us
        );

        Ok(Some(Entry {
            offset: located.offset,
            header: located.header,
            payload,
        }))
    }

    /// Locate the next entry and skip over its payload without reading it
    pub fn skip_entry<R: Read + Seek>(
        &self,
        reader: &mut FrameReader<R>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<Located>> {
        let Some(located) = self.locate(reader, diagnostics)? else {
            return Ok(None);
        };
        self.check_body(reader, &located)?;
        reader.skip(located.header.body_len())?;
        Ok(Some(located))
    }

    /// Find the next entry header, resynchronizing past corrupt bytes
    ///
    /// On success the reader sits right after the header.
    fn locate<R: Read + Seek>(
        &self,
        reader: &mut FrameReader<R>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<Located>> {
        let size = self.layout.size as u64;

        loop {
            let offset = reader.position();
            let remaining = reader.remaining();
            if remaining < size {
                if remaining > 0 {
                    diagnostics.push(Diagnostic::TrailingBytes {
                        offset,
                        len: remaining,
                    });
                }
                return Ok(None);
            }

            let raw = reader.read_exact(self.layout.size)?;
            let header = self.decode_header(&raw);

            let restart = if header.sync != SYNC_BYTE {
                offset
            } else if !self.accepts(&header) {
                // Sync byte is plausible but the length is not: skip past it
                log::debug!(
                    "Entry at 0x{:X} declares implausible payload_len {}",
                    offset,
                    header.payload_len
                );
                diagnostics.push(Diagnostic::Desync {
                    offset,
                    byte: header.sync,
                });
                offset + 1
            } else {
                return Ok(Some(Located { offset, header }));
            };

            reader.seek_to(restart)?;
            match reader.resynchronize(self.resync_window, diagnostics)? {
                Resync::Found(_) => continue,
                Resync::EndOfFile => return Ok(None),
                Resync::WindowExhausted => {
                    diagnostics.push(Diagnostic::ResyncAbandoned {
                        offset: restart,
                        scanned: reader.position() - restart,
                    });
                    return Ok(None);
                }
            }
        }
    }

    fn accepts(&self, header: &EntryHeader) -> bool {
        match self.max_payload_len {
            Some(max) => header.payload_len <= max,
            None => true,
        }
    }

    fn check_body<R: Read + Seek>(
        &self,
        reader: &FrameReader<R>,
        located: &Located,
    ) -> Result<()> {
        let needed = located.header.body_len();
        let available = reader.remaining();
        if available < needed {
            return Err(DecoderError::TruncatedEntry {
                offset: located.offset,
                payload_len: located.header.payload_len,
                needed,
                available,
            });
        }
        Ok(())
    }
}
