//! System header parsing
//!
//! Reads the fixed header region described by a [`HeaderSchema`] and turns it
//! into a validated [`SystemHeader`]. The magic is checked before any other
//! field is looked at.

use crate::reader::FrameReader;
use crate::schema::{fixed_str, magic_matches, HeaderSchema, PROBE_LEN};
use crate::types::{DecoderError, Result, SystemHeader, UserMetadata};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Seek};

/// Detect the layout of the source and parse its header
///
/// A `forced` schema skips detection but is still validated. On success the
/// reader is positioned at `data_offset`.
pub fn read_system_header<R: Read + Seek>(
    reader: &mut FrameReader<R>,
    forced: Option<HeaderSchema>,
) -> Result<SystemHeader> {
    reader.seek_to(0)?;
    let probe_len = reader.remaining().min(PROBE_LEN as u64) as usize;
    let probe = reader.read_exact(probe_len)?;
    reader.seek_to(0)?;

    let schema = match forced {
        Some(schema) => schema.validate(&probe)?,
        None => HeaderSchema::detect(&probe)?,
    };

    parse_system_header(reader, schema)
}

/// Parse the header region of `schema` from the start of the source
pub fn parse_system_header<R: Read + Seek>(
    reader: &mut FrameReader<R>,
    schema: HeaderSchema,
) -> Result<SystemHeader> {
    let layout = schema.layout();
    let needed = layout.region_size() as u64;
    let available = reader.len();

    reader.seek_to(0)?;
    if available < needed {
        return Err(DecoderError::TruncatedHeader { needed, available });
    }

    let region = reader.read_exact(layout.region_size())?;
    let header = decode_system_header(&region, schema)?;

    if header.data_offset > available {
        return Err(DecoderError::TruncatedHeader {
            needed: header.data_offset,
            available,
        });
    }

    reader.seek_to(header.data_offset)?;
    log::info!(
        "Header: {} layout, v{}, format {}, board {:?}, firmware {:?}, data at 0x{:X}",
        schema,
        header.version,
        header.channel_format,
        header.board_name,
        header.firmware_version,
        header.data_offset
    );
    Ok(header)
}

/// Decode a header from an in-memory region of at least `region_size` bytes
pub fn decode_system_header(region: &[u8], schema: HeaderSchema) -> Result<SystemHeader> {
    let layout = schema.layout();
    if region.len() < layout.region_size() {
        return Err(DecoderError::TruncatedHeader {
            needed: layout.region_size() as u64,
            available: region.len() as u64,
        });
    }

    let magic_bytes = &region[layout.magic.range()];
    if !magic_matches(magic_bytes) {
        return Err(DecoderError::InvalidMagic {
            found: fixed_str(magic_bytes),
        });
    }

    let u32_at = |offset: usize| LittleEndian::read_u32(&region[offset..offset + 4]);
    let u64_at = |offset: usize| LittleEndian::read_u64(&region[offset..offset + 8]);

    let epoch_time_us = layout.epoch_time.map(u64_at).unwrap_or(0);
    let implied = layout.implied_data_offset();
    let data_offset = match layout.data_offset.map(u32_at) {
        Some(declared) if u64::from(declared) >= implied => u64::from(declared),
        Some(declared) => {
            if declared != 0 {
                log::warn!(
                    "Declared data offset {} lies inside the header region, using {}",
                    declared,
                    implied
                );
            }
            implied
        }
        None => implied,
    };

    let metadata = if layout.metadata_size > 0 {
        let start = layout.system_header_size;
        Some(UserMetadata {
            description: fixed_str(&region[start..start + layout.metadata_size]),
        })
    } else {
        None
    };

    Ok(SystemHeader {
        schema,
        magic: fixed_str(magic_bytes),
        version: u32_at(layout.version),
        header_size: u32_at(layout.header_size),
        epoch_time_us,
        epoch_available: epoch_time_us != 0,
        sys_base_us: u64_at(layout.sys_base),
        channel_format: u32_at(layout.channel_format).into(),
        board_name: fixed_str(&region[layout.board_name.range()]),
        firmware_version: fixed_str(&region[layout.firmware_version.range()]),
        metadata_offset: layout.metadata_offset.map(u32_at),
        data_offset,
        metadata,
        crc32: layout.crc32.map(u32_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{HeaderSpec, LogEncoder};
    use crate::types::ChannelFormat;
    use std::io::Cursor;

    fn split_spec() -> HeaderSpec {
        HeaderSpec {
            schema: HeaderSchema::Split,
            version: 1,
            epoch_time_us: 1_768_000_000_000_000,
            sys_base_us: 5_000_000,
            channel_format: ChannelFormat::Can,
            board_name: "QQMLAB-ESP32S3".to_string(),
            firmware_version: "v0.3.1".to_string(),
            metadata: Some("CAN bus log, XC60, 20260117".to_string()),
        }
    }

    #[test]
    fn test_parse_split_header() {
        let bytes = LogEncoder::new(&split_spec()).into_bytes();
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();

        let header = read_system_header(&mut reader, None).unwrap();

        assert_eq!(header.schema, HeaderSchema::Split);
        assert_eq!(header.magic, "QQMLAB");
        assert_eq!(header.version, 1);
        assert_eq!(header.header_size, 512);
        assert_eq!(header.epoch_time_us, 1_768_000_000_000_000);
        assert!(header.epoch_available);
        assert_eq!(header.sys_base_us, 5_000_000);
        assert_eq!(header.channel_format, ChannelFormat::Can);
        assert_eq!(header.board_name, "QQMLAB-ESP32S3");
        assert_eq!(header.firmware_version, "v0.3.1");
        assert_eq!(header.metadata_offset, Some(512));
        assert_eq!(header.data_offset, 1024);
        assert_eq!(
            header.metadata.unwrap().description,
            "CAN bus log, XC60, 20260117"
        );
        assert_eq!(reader.position(), 1024);
    }

    #[test]
    fn test_parse_unified_header() {
        let spec = HeaderSpec {
            schema: HeaderSchema::Unified,
            metadata: None,
            ..split_spec()
        };
        let bytes = LogEncoder::new(&spec).into_bytes();
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();

        let header = read_system_header(&mut reader, None).unwrap();

        assert_eq!(header.schema, HeaderSchema::Unified);
        assert_eq!(header.header_size, 1024);
        assert_eq!(header.epoch_time_us, 0);
        assert!(!header.epoch_available);
        assert_eq!(header.sys_base_us, 5_000_000);
        assert_eq!(header.board_name, "QQMLAB-ESP32S3");
        assert!(header.metadata.is_none());
        assert_eq!(header.data_offset, 1024);
    }

    #[test]
    fn test_truncated_header() {
        let mut bytes = LogEncoder::new(&split_spec()).into_bytes();
        bytes.truncate(700);
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();

        match read_system_header(&mut reader, None) {
            Err(DecoderError::TruncatedHeader { needed, available }) => {
                assert_eq!(needed, 1024);
                assert_eq!(available, 700);
            }
            other => panic!("expected TruncatedHeader, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_magic_rejected_before_fields() {
        let mut bytes = LogEncoder::new(&split_spec()).into_bytes();
        bytes[..8].copy_from_slice(b"NOTQQML\0");
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();

        assert!(matches!(
            read_system_header(&mut reader, None),
            Err(DecoderError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_declared_data_offset_beyond_eof() {
        let mut bytes = LogEncoder::new(&split_spec()).into_bytes();
        LittleEndian::write_u32(&mut bytes[88..92], 4096);
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();

        assert!(matches!(
            read_system_header(&mut reader, None),
            Err(DecoderError::TruncatedHeader { needed: 4096, available: 1024 })
        ));
    }

    #[test]
    fn test_zero_data_offset_uses_layout_default() {
        let mut bytes = LogEncoder::new(&split_spec()).into_bytes();
        LittleEndian::write_u32(&mut bytes[88..92], 0);
        let header = decode_system_header(&bytes, HeaderSchema::Split).unwrap();
        assert_eq!(header.data_offset, 1024);
    }
}
