//! Log file encoder
//!
//! Writes headers and framed entries in the exact layout the decoder reads.
//! Used to build fixtures; the decoder itself never writes.

use crate::schema::{EntryLayout, Field, HeaderSchema};
use crate::types::{align8, CanFrame, ChannelFormat, EntryHeader, SYNC_BYTE, MAGIC};
use byteorder::{ByteOrder, LittleEndian};

/// Size of the TWAI message struct the firmware stores per CAN entry
pub const CAN_PAYLOAD_LEN: usize = 20;

/// Header contents for a new log
#[derive(Debug, Clone)]
pub struct HeaderSpec {
    pub schema: HeaderSchema,
    pub version: u32,
    /// Ignored by layouts without an epoch field
    pub epoch_time_us: u64,
    pub sys_base_us: u64,
    pub channel_format: ChannelFormat,
    pub board_name: String,
    pub firmware_version: String,
    /// Ignored by layouts without a metadata block
    pub metadata: Option<String>,
}

impl Default for HeaderSpec {
    fn default() -> Self {
        Self {
            schema: HeaderSchema::Split,
            version: 1,
            epoch_time_us: 0,
            sys_base_us: 0,
            channel_format: ChannelFormat::Text,
            board_name: String::new(),
            firmware_version: String::new(),
            metadata: None,
        }
    }
}

/// In-memory log builder
pub struct LogEncoder {
    buf: Vec<u8>,
    entry_layout: EntryLayout,
    data_offset: u64,
}

impl LogEncoder {
    /// Start a log by writing its header region
    pub fn new(spec: &HeaderSpec) -> Self {
        let buf = encode_header(spec);
        let data_offset = buf.len() as u64;
        Self {
            buf,
            entry_layout: spec.schema.layout().entry,
            data_offset,
        }
    }

    /// Offset of the first entry
    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Append one entry (header, payload, zero padding); returns its offset
    pub fn push_entry(&mut self, entry_type: u8, device_time_us: u64, payload: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        let header = EntryHeader {
            sync: SYNC_BYTE,
            entry_type,
            reserved: 0,
            payload_len: payload.len() as u32,
            device_time_us,
        };
        self.buf
            .extend_from_slice(&encode_entry_header(&self.entry_layout, &header));
        self.buf.extend_from_slice(payload);
        let padded = align8(payload.len() as u64) as usize;
        self.buf.resize(self.buf.len() + padded - payload.len(), 0);
        offset
    }

    /// Append a CAN entry using the firmware's TWAI message layout
    pub fn push_can_frame(&mut self, device_time_us: u64, frame: &CanFrame) -> u64 {
        self.push_entry(0, device_time_us, &encode_can_payload(frame))
    }

    /// Append arbitrary bytes (garbage, partial entries)
    pub fn push_raw(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        offset
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode the header region (system header plus metadata block) of `spec`
pub fn encode_header(spec: &HeaderSpec) -> Vec<u8> {
    let layout = spec.schema.layout();
    let mut buf = vec![0u8; layout.region_size()];

    write_str(&mut buf, layout.magic, MAGIC);
    LittleEndian::write_u32(&mut buf[layout.version..], spec.version);
    LittleEndian::write_u32(
        &mut buf[layout.header_size..],
        layout.system_header_size as u32,
    );
    if let Some(offset) = layout.epoch_time {
        LittleEndian::write_u64(&mut buf[offset..], spec.epoch_time_us);
    }
    LittleEndian::write_u64(&mut buf[layout.sys_base..], spec.sys_base_us);
    LittleEndian::write_u32(&mut buf[layout.channel_format..], spec.channel_format.code());
    write_str(&mut buf, layout.board_name, &spec.board_name);
    write_str(&mut buf, layout.firmware_version, &spec.firmware_version);
    if let Some(offset) = layout.metadata_offset {
        LittleEndian::write_u32(&mut buf[offset..], layout.system_header_size as u32);
    }
    if let Some(offset) = layout.data_offset {
        LittleEndian::write_u32(&mut buf[offset..], layout.region_size() as u32);
    }
    if let Some(text) = &spec.metadata {
        if layout.metadata_size > 0 {
            let field = Field {
                offset: layout.system_header_size,
                width: layout.metadata_size,
            };
            write_str(&mut buf, field, text);
        }
    }
    buf
}

/// Encode an entry header
pub fn encode_entry_header(layout: &EntryLayout, header: &EntryHeader) -> Vec<u8> {
    let mut buf = vec![0u8; layout.size];
    buf[layout.sync] = header.sync;
    buf[layout.entry_type] = header.entry_type;
    if let Some(offset) = layout.reserved {
        LittleEndian::write_u16(&mut buf[offset..], header.reserved);
    }
    LittleEndian::write_u32(&mut buf[layout.payload_len..], header.payload_len);
    LittleEndian::write_u64(&mut buf[layout.device_time..], header.device_time_us);
    buf
}

/// Encode a CAN frame as a 20-byte TWAI message (flags, id, dlc, data[8], pad)
pub fn encode_can_payload(frame: &CanFrame) -> Vec<u8> {
    let mut buf = vec![0u8; CAN_PAYLOAD_LEN];
    LittleEndian::write_u32(&mut buf[0..4], frame.flags);
    LittleEndian::write_u32(&mut buf[4..8], frame.identifier);
    buf[8] = frame.dlc;
    let len = frame.data.len().min(8);
    buf[9..9 + len].copy_from_slice(&frame.data[..len]);
    buf
}

fn write_str(buf: &mut [u8], field: Field, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.width);
    buf[field.offset..field.offset + len].copy_from_slice(&bytes[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ENTRY_LAYOUT;

    #[test]
    fn test_entry_is_padded_to_eight() {
        let mut encoder = LogEncoder::new(&HeaderSpec::default());
        let first = encoder.push_entry(0, 100, b"hello");
        let second = encoder.push_entry(0, 200, b"12345678");

        assert_eq!(first, 1024);
        assert_eq!(second, 1024 + 16 + 8);
        assert_eq!(encoder.len(), 1024 + 16 + 8 + 16 + 8);
    }

    #[test]
    fn test_entry_header_bytes() {
        let header = EntryHeader {
            sync: SYNC_BYTE,
            entry_type: 2,
            reserved: 0,
            payload_len: 0x0102_0304,
            device_time_us: 0x1122_3344_5566_7788,
        };
        let bytes = encode_entry_header(&ENTRY_LAYOUT, &header);
        assert_eq!(
            bytes,
            vec![
                0xA5, 0x02, 0x00, 0x00, 0x04, 0x03, 0x02, 0x01, 0x88, 0x77, 0x66, 0x55, 0x44,
                0x33, 0x22, 0x11
            ]
        );
    }

    #[test]
    fn test_can_payload_layout() {
        let frame = CanFrame {
            flags: 1,
            identifier: 0x1ABC_DEF0,
            dlc: 3,
            data: vec![1, 2, 3],
        };
        let bytes = encode_can_payload(&frame);
        assert_eq!(bytes.len(), CAN_PAYLOAD_LEN);
        assert_eq!(&bytes[0..4], &[1, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0xF0, 0xDE, 0xBC, 0x1A]);
        assert_eq!(bytes[8], 3);
        assert_eq!(&bytes[9..12], &[1, 2, 3]);
    }
}
