//! Core types for the datalog decoder library
//!
//! This module defines everything the decoder emits while walking a log file:
//! the parsed file header, framed entries, interpreted payloads and the final
//! `DecodedRecord`. The decoder does not render or store anything; these are
//! plain owned values that outlive the reader they came from.

use crate::schema::HeaderSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Marker byte at the start of every entry header
pub const SYNC_BYTE: u8 = 0xA5;

/// Magic tag stored (NUL padded) in the first 8 bytes of every log file
pub const MAGIC: &str = "QQMLAB";

/// Round a length up to the next multiple of 8
pub fn align8(len: u64) -> u64 {
    len.div_ceil(8) * 8
}

/// Channel format declared by the producer in the system header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelFormat {
    /// Text lines (HTTP/console sources)
    Text,
    /// Raw TWAI/CAN frames
    Can,
    /// ADC samples, no payload decoder exists yet
    Adc,
    /// Any other declared value
    Unknown(u32),
}

impl ChannelFormat {
    /// Numeric code as stored in the header
    pub fn code(&self) -> u32 {
        match self {
            ChannelFormat::Text => 0,
            ChannelFormat::Can => 1,
            ChannelFormat::Adc => 2,
            ChannelFormat::Unknown(code) => *code,
        }
    }
}

impl From<u32> for ChannelFormat {
    fn from(code: u32) -> Self {
        match code {
            0 => ChannelFormat::Text,
            1 => ChannelFormat::Can,
            2 => ChannelFormat::Adc,
            other => ChannelFormat::Unknown(other),
        }
    }
}

impl fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelFormat::Text => write!(f, "TEXT"),
            ChannelFormat::Can => write!(f, "CAN"),
            ChannelFormat::Adc => write!(f, "ADC"),
            ChannelFormat::Unknown(code) => write!(f, "UNKNOWN({})", code),
        }
    }
}

/// Which clock absolute timestamps are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timebase {
    /// `absolute_time_us` is wall-clock microseconds since the Unix epoch
    Epoch,
    /// No epoch was recorded; `absolute_time_us` equals `relative_time_us`
    Relative,
}

impl fmt::Display for Timebase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timebase::Epoch => write!(f, "epoch"),
            Timebase::Relative => write!(f, "relative"),
        }
    }
}

/// Free-text description block that follows the system header in the split layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    /// NUL-trimmed ASCII description (e.g. "CAN bus log, XC60, 20260117")
    pub description: String,
}

/// Validated file header
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemHeader {
    /// Layout the header was decoded with
    pub schema: HeaderSchema,
    /// Magic tag, NUL-trimmed (always "QQMLAB" once validated)
    pub magic: String,
    pub version: u32,
    /// Declared size of the system header block
    pub header_size: u32,
    /// Wall-clock microseconds at file creation (0 when unavailable)
    pub epoch_time_us: u64,
    /// False when the layout has no epoch field or the producer left it zero
    pub epoch_available: bool,
    /// Device-monotonic microseconds at recording start
    pub sys_base_us: u64,
    pub channel_format: ChannelFormat,
    pub board_name: String,
    pub firmware_version: String,
    /// Declared offset of the metadata block, if the layout has one
    pub metadata_offset: Option<u32>,
    /// Byte offset where the entry stream begins
    pub data_offset: u64,
    pub metadata: Option<UserMetadata>,
    /// Stored CRC word of the split layout (not verified by the producer either)
    pub crc32: Option<u32>,
}

impl SystemHeader {
    /// Timebase implied by the presence of an epoch timestamp
    pub fn timebase(&self) -> Timebase {
        if self.epoch_available {
            Timebase::Epoch
        } else {
            Timebase::Relative
        }
    }
}

/// Fixed 16-byte header in front of every entry payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryHeader {
    pub sync: u8,
    /// Producer sub-type tag within the channel
    pub entry_type: u8,
    pub reserved: u16,
    /// Payload length in bytes, excluding padding
    pub payload_len: u32,
    /// Device-monotonic capture time
    pub device_time_us: u64,
}

impl EntryHeader {
    /// Number of padding bytes following the payload
    pub fn padding_len(&self) -> u64 {
        let len = u64::from(self.payload_len);
        align8(len) - len
    }

    /// Payload plus padding
    pub fn body_len(&self) -> u64 {
        align8(u64::from(self.payload_len))
    }
}

/// One framed entry as read from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Offset of the sync byte
    pub offset: u64,
    pub header: EntryHeader,
    /// Exactly `header.payload_len` bytes
    pub payload: Vec<u8>,
}

/// Classic CAN frame captured by the TWAI driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// TWAI flag word (bit 0 extended, bit 1 remote, bit 2 single-shot, bit 3 self-rx)
    pub flags: u32,
    /// 11-bit or 29-bit identifier
    pub identifier: u32,
    /// Data length code (0-8)
    pub dlc: u8,
    /// Exactly `dlc` bytes
    pub data: Vec<u8>,
}

impl CanFrame {
    pub const FLAG_EXTENDED: u32 = 1 << 0;
    pub const FLAG_REMOTE: u32 = 1 << 1;
    pub const FLAG_SINGLE_SHOT: u32 = 1 << 2;
    pub const FLAG_SELF_RX: u32 = 1 << 3;

    /// True if this frame uses a 29-bit identifier
    pub fn is_extended(&self) -> bool {
        self.flags & Self::FLAG_EXTENDED != 0
    }

    /// True if this is a remote transmission request
    pub fn is_remote(&self) -> bool {
        self.flags & Self::FLAG_REMOTE != 0
    }

    /// Identifier as uppercase hex: 8 digits when extended, 3 otherwise
    pub fn identifier_hex(&self) -> String {
        if self.is_extended() {
            format!("{:08X}", self.identifier)
        } else {
            format!("{:03X}", self.identifier)
        }
    }

    /// Data bytes as space separated uppercase hex
    pub fn data_hex(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.identifier_hex(), self.dlc)?;
        if !self.data.is_empty() {
            write!(f, " {}", self.data_hex())?;
        }
        Ok(())
    }
}

/// Text line decoded from a TEXT channel payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRecord {
    pub text: String,
    /// True if invalid UTF-8 sequences were replaced
    pub lossy: bool,
}

/// Interpreted payload of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadView {
    Can(CanFrame),
    Text(TextRecord),
    Raw { bytes: Vec<u8> },
}

impl PayloadView {
    /// Single-line rendering used by CSV and console output
    pub fn render(&self) -> String {
        match self {
            PayloadView::Can(frame) => frame.to_string(),
            PayloadView::Text(record) => record
                .text
                .chars()
                .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                .collect(),
            PayloadView::Raw { bytes } => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        }
    }
}

/// Output unit of the decoding pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedRecord {
    /// 1-based position in the decoded stream
    pub sequence_number: u64,
    /// Offset of the entry's sync byte
    pub file_offset: u64,
    pub device_time_us: u64,
    /// `device_time_us - anchor`; negative values are kept as-is
    pub relative_time_us: i64,
    /// `epoch_time_us + relative_time_us` (equals relative time under `Timebase::Relative`)
    pub absolute_time_us: i64,
    pub timebase: Timebase,
    pub entry_type: u8,
    pub payload_len: u32,
    pub payload: PayloadView,
}

impl DecodedRecord {
    /// Relative time in milliseconds
    pub fn relative_time_ms(&self) -> f64 {
        self.relative_time_us as f64 / 1000.0
    }

    /// Absolute wall-clock time, only when the epoch timebase is in effect
    pub fn absolute_datetime(&self) -> Option<DateTime<Utc>> {
        match self.timebase {
            Timebase::Epoch => DateTime::from_timestamp_micros(self.absolute_time_us),
            Timebase::Relative => None,
        }
    }

    /// Rendered payload content
    pub fn render_content(&self) -> String {
        self.payload.render()
    }
}

/// Non-fatal anomaly reported on the diagnostic side channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A byte skipped while searching for the next sync byte
    Desync { offset: u64, byte: u8 },
    /// Resynchronization gave up after scanning its window
    ResyncAbandoned { offset: u64, scanned: u64 },
    /// CAN payload could not be parsed, record degraded to raw bytes
    MalformedCanFrame {
        offset: u64,
        sequence_number: u64,
        reason: String,
    },
    /// Bytes at end of file too short to hold an entry header
    TrailingBytes { offset: u64, len: u64 },
    /// Final entry promises more bytes than the file holds
    TruncatedTail {
        offset: u64,
        payload_len: u32,
        available: u64,
    },
}

impl Diagnostic {
    /// File offset the diagnostic refers to
    pub fn offset(&self) -> u64 {
        match self {
            Diagnostic::Desync { offset, .. }
            | Diagnostic::ResyncAbandoned { offset, .. }
            | Diagnostic::MalformedCanFrame { offset, .. }
            | Diagnostic::TrailingBytes { offset, .. }
            | Diagnostic::TruncatedTail { offset, .. } => *offset,
        }
    }

    /// True for diagnostics that end the stream as `Failed`
    pub fn is_fatal(&self) -> bool {
        matches!(self, Diagnostic::TruncatedTail { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Desync { offset, byte } => {
                write!(f, "0x{:06X}: lost sync, skipped byte 0x{:02X}", offset, byte)
            }
            Diagnostic::ResyncAbandoned { offset, scanned } => write!(
                f,
                "0x{:06X}: no sync byte within {} bytes, giving up",
                offset, scanned
            ),
            Diagnostic::MalformedCanFrame {
                offset,
                sequence_number,
                reason,
            } => write!(
                f,
                "0x{:06X}: record #{} malformed CAN frame ({}), kept as raw bytes",
                offset, sequence_number, reason
            ),
            Diagnostic::TrailingBytes { offset, len } => write!(
                f,
                "0x{:06X}: {} trailing bytes too short for an entry header",
                offset, len
            ),
            Diagnostic::TruncatedTail {
                offset,
                payload_len,
                available,
            } => write!(
                f,
                "0x{:06X}: truncated entry, payload_len {} but only {} bytes remain",
                offset, payload_len, available
            ),
        }
    }
}

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Invalid magic: expected \"QQMLAB\", found {found:?}")]
    InvalidMagic { found: String },

    #[error("Truncated header: need {needed} bytes, only {available} available")]
    TruncatedHeader { needed: u64, available: u64 },

    #[error("Header schema mismatch: {0}")]
    HeaderSchema(String),

    #[error("Unexpected end of file at offset 0x{offset:X}: need {needed} bytes, {available} remaining")]
    UnexpectedEof {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("Truncated entry at offset 0x{offset:X}: payload_len {payload_len} needs {needed} bytes, only {available} remain")]
    TruncatedEntry {
        offset: u64,
        payload_len: u32,
        needed: u64,
        available: u64,
    },

    #[error("Malformed CAN frame: {0}")]
    MalformedCanFrame(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
