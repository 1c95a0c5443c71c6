//! Header layout variants
//!
//! Different firmware and tool versions wrote two header layouts. Both are
//! described here as offset tables so the header parser and entry decoder stay
//! layout-agnostic.
//!
//! ## Split layout
//! 512-byte system header followed by a 512-byte free-text metadata block.
//! This is the struct written by the logger firmware:
//!
//! | Offset | Size | Field          |
//! |--------|------|----------------|
//! | 0      | 8    | magic          |
//! | 8      | 4    | version        |
//! | 12     | 4    | header_size    |
//! | 16     | 8    | epoch_time_us  |
//! | 24     | 8    | sys_base_us    |
//! | 32     | 4    | channel_format |
//! | 36     | 32   | board_name     |
//! | 68     | 16   | firmware       |
//! | 84     | 4    | meta offset    |
//! | 88     | 4    | data offset    |
//! | 508    | 4    | crc32          |
//!
//! ## Unified layout
//! A single 1024-byte block without metadata or epoch field.

use crate::types::{DecoderError, Result, MAGIC};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Bytes needed to recognise a layout (magic + version + header_size)
pub const PROBE_LEN: usize = 16;

const MAGIC_FIELD: Field = Field { offset: 0, width: 8 };
const HEADER_SIZE_OFFSET: usize = 12;

/// A fixed-width field inside a header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub width: usize,
}

impl Field {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width
    }
}

/// Offsets of the entry header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    /// Total entry header size
    pub size: usize,
    pub sync: usize,
    pub entry_type: usize,
    pub reserved: Option<usize>,
    pub payload_len: usize,
    pub device_time: usize,
}

/// Shared by both layouts: sync, type, 2 reserved bytes, u32 length, u64 time
pub const ENTRY_LAYOUT: EntryLayout = EntryLayout {
    size: 16,
    sync: 0,
    entry_type: 1,
    reserved: Some(2),
    payload_len: 4,
    device_time: 8,
};

/// Byte layout of one header variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Size of the system header block (also the expected `header_size` value)
    pub system_header_size: usize,
    /// Size of the metadata block following the system header (0 if none)
    pub metadata_size: usize,
    pub magic: Field,
    pub version: usize,
    pub header_size: usize,
    pub epoch_time: Option<usize>,
    pub sys_base: usize,
    pub channel_format: usize,
    pub board_name: Field,
    pub firmware_version: Field,
    pub metadata_offset: Option<usize>,
    pub data_offset: Option<usize>,
    pub crc32: Option<usize>,
    pub entry: EntryLayout,
}

impl HeaderLayout {
    /// Bytes occupied by system header plus metadata block
    pub fn region_size(&self) -> usize {
        self.system_header_size + self.metadata_size
    }

    /// Data offset when none is declared
    pub fn implied_data_offset(&self) -> u64 {
        self.region_size() as u64
    }
}

const SPLIT_LAYOUT: HeaderLayout = HeaderLayout {
    system_header_size: 512,
    metadata_size: 512,
    magic: MAGIC_FIELD,
    version: 8,
    header_size: HEADER_SIZE_OFFSET,
    epoch_time: Some(16),
    sys_base: 24,
    channel_format: 32,
    board_name: Field { offset: 36, width: 32 },
    firmware_version: Field { offset: 68, width: 16 },
    metadata_offset: Some(84),
    data_offset: Some(88),
    crc32: Some(508),
    entry: ENTRY_LAYOUT,
};

const UNIFIED_LAYOUT: HeaderLayout = HeaderLayout {
    system_header_size: 1024,
    metadata_size: 0,
    magic: MAGIC_FIELD,
    version: 8,
    header_size: HEADER_SIZE_OFFSET,
    epoch_time: None,
    sys_base: 16,
    channel_format: 24,
    board_name: Field { offset: 28, width: 32 },
    firmware_version: Field { offset: 60, width: 16 },
    metadata_offset: None,
    data_offset: Some(76),
    crc32: None,
    entry: ENTRY_LAYOUT,
};

/// Supported header layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderSchema {
    /// 512-byte system header + 512-byte metadata block
    Split,
    /// Single 1024-byte header
    Unified,
}

impl HeaderSchema {
    /// Order in which layouts are tried during detection
    pub const DETECTION_ORDER: [HeaderSchema; 2] = [HeaderSchema::Unified, HeaderSchema::Split];

    pub fn layout(self) -> &'static HeaderLayout {
        match self {
            HeaderSchema::Split => &SPLIT_LAYOUT,
            HeaderSchema::Unified => &UNIFIED_LAYOUT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HeaderSchema::Split => "split",
            HeaderSchema::Unified => "unified",
        }
    }

    /// True if the probe carries the magic and this layout's own header size
    pub fn is_self_consistent(self, probe: &[u8]) -> bool {
        let layout = self.layout();
        probe.len() >= PROBE_LEN
            && magic_matches(&probe[layout.magic.range()])
            && declared_header_size(probe, layout) == layout.system_header_size as u32
    }

    /// Pick the layout of a file from its first bytes
    ///
    /// The unified layout wins only if its declared header size is
    /// self-consistent; everything else carrying the magic is read with the
    /// split layout.
    pub fn detect(probe: &[u8]) -> Result<HeaderSchema> {
        check_probe(probe)?;

        for schema in Self::DETECTION_ORDER {
            if schema.is_self_consistent(probe) {
                log::debug!("Header matches {} layout", schema.name());
                return Ok(schema);
            }
        }

        let declared = declared_header_size(probe, &SPLIT_LAYOUT);
        log::warn!(
            "Header declares header_size {}, matching no layout; falling back to split layout",
            declared
        );
        Ok(HeaderSchema::Split)
    }

    /// Validate a caller-forced layout against the probe
    pub fn validate(self, probe: &[u8]) -> Result<HeaderSchema> {
        check_probe(probe)?;

        let layout = self.layout();
        let declared = declared_header_size(probe, layout);
        if declared != layout.system_header_size as u32 {
            return Err(DecoderError::HeaderSchema(format!(
                "{} layout expects header_size {}, file declares {}",
                self.name(),
                layout.system_header_size,
                declared
            )));
        }
        Ok(self)
    }
}

impl std::fmt::Display for HeaderSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn check_probe(probe: &[u8]) -> Result<()> {
    if probe.len() < PROBE_LEN {
        return Err(DecoderError::TruncatedHeader {
            needed: PROBE_LEN as u64,
            available: probe.len() as u64,
        });
    }
    let magic = &probe[MAGIC_FIELD.range()];
    if !magic_matches(magic) {
        return Err(DecoderError::InvalidMagic {
            found: fixed_str(magic),
        });
    }
    Ok(())
}

fn declared_header_size(probe: &[u8], layout: &HeaderLayout) -> u32 {
    LittleEndian::read_u32(&probe[layout.header_size..layout.header_size + 4])
}

/// Check a magic field against "QQMLAB" after NUL-trimming
pub fn magic_matches(field: &[u8]) -> bool {
    fixed_str(field) == MAGIC
}

/// Decode a fixed-width C string field: cut at the first NUL, replace invalid
/// bytes, trim whitespace
pub fn fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}
