//! Payload interpretation
//!
//! Dispatches on the channel format declared in the system header (the
//! per-entry type byte is only a sub-classification within a channel).
//!
//! CAN payloads hold the TWAI message struct captured by the firmware:
//!
//! | Offset | Size | Field      |
//! |--------|------|------------|
//! | 0      | 4    | flags      |
//! | 4      | 4    | identifier |
//! | 8      | 1    | dlc        |
//! | 9      | dlc  | data       |
//!
//! followed by unused data bytes and struct padding.

use crate::types::{CanFrame, ChannelFormat, DecoderError, PayloadView, Result, TextRecord};
use byteorder::{ByteOrder, LittleEndian};

const CAN_FLAGS_OFFSET: usize = 0;
const CAN_IDENTIFIER_OFFSET: usize = 4;
const CAN_DLC_OFFSET: usize = 8;
const CAN_DATA_OFFSET: usize = 9;

/// Largest data length code of a classic CAN frame
pub const CAN_MAX_DLC: u8 = 8;

impl CanFrame {
    /// Parse a CAN payload
    ///
    /// Fails if the fixed fields are cut short, if `dlc` exceeds 8, or if
    /// fewer than `dlc` data bytes follow.
    pub fn parse(payload: &[u8]) -> Result<CanFrame> {
        if payload.len() < CAN_DATA_OFFSET {
            return Err(DecoderError::MalformedCanFrame(format!(
                "payload of {} bytes is shorter than the {}-byte frame header",
                payload.len(),
                CAN_DATA_OFFSET
            )));
        }

        let dlc = payload[CAN_DLC_OFFSET];
        if dlc > CAN_MAX_DLC {
            return Err(DecoderError::MalformedCanFrame(format!(
                "dlc {} exceeds {}",
                dlc, CAN_MAX_DLC
            )));
        }

        let available = payload.len() - CAN_DATA_OFFSET;
        if usize::from(dlc) > available {
            return Err(DecoderError::MalformedCanFrame(format!(
                "dlc {} but only {} data bytes present",
                dlc, available
            )));
        }

        Ok(CanFrame {
            flags: LittleEndian::read_u32(&payload[CAN_FLAGS_OFFSET..]),
            identifier: LittleEndian::read_u32(&payload[CAN_IDENTIFIER_OFFSET..]),
            dlc,
            data: payload[CAN_DATA_OFFSET..CAN_DATA_OFFSET + usize::from(dlc)].to_vec(),
        })
    }
}

impl TextRecord {
    /// Best-effort text decode; never fails
    pub fn decode(payload: &[u8]) -> TextRecord {
        let text = String::from_utf8_lossy(payload);
        let lossy = matches!(text, std::borrow::Cow::Owned(_));
        TextRecord {
            text: text
                .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
                .to_string(),
            lossy,
        }
    }
}

/// Result of interpreting one payload
#[derive(Debug)]
pub struct Interpreted {
    pub view: PayloadView,
    /// Set when a CAN payload had to fall back to raw bytes
    pub malformed: Option<DecoderError>,
}

/// Turns payload bytes into a [`PayloadView`] according to the channel format
#[derive(Debug, Clone, Copy)]
pub struct PayloadInterpreter {
    format: ChannelFormat,
}

impl PayloadInterpreter {
    pub fn new(format: ChannelFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> ChannelFormat {
        self.format
    }

    /// Interpret a payload; malformed CAN frames degrade to raw bytes
    pub fn interpret(&self, payload: Vec<u8>) -> Interpreted {
        match self.format {
            ChannelFormat::Can => match CanFrame::parse(&payload) {
                Ok(frame) => Interpreted {
                    view: PayloadView::Can(frame),
                    malformed: None,
                },
                Err(e) => Interpreted {
                    view: PayloadView::Raw { bytes: payload },
                    malformed: Some(e),
                },
            },
            ChannelFormat::Text => Interpreted {
                view: PayloadView::Text(TextRecord::decode(&payload)),
                malformed: None,
            },
            ChannelFormat::Adc | ChannelFormat::Unknown(_) => Interpreted {
                view: PayloadView::Raw { bytes: payload },
                malformed: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_can_payload;

    #[test]
    fn test_parse_extended_can_frame() {
        let mut payload = vec![0u8; 20];
        payload[0..4].copy_from_slice(&0x0000_0001u32.to_le_bytes());
        payload[4..8].copy_from_slice(&0x1ABC_DEF0u32.to_le_bytes());
        payload[8] = 3;
        payload[9..12].copy_from_slice(&[0x01, 0x02, 0x03]);

        let frame = CanFrame::parse(&payload).unwrap();

        assert!(frame.is_extended());
        assert_eq!(frame.identifier, 0x1ABC_DEF0);
        assert_eq!(frame.identifier_hex(), "1ABCDEF0");
        assert_eq!(frame.dlc, 3);
        assert_eq!(frame.data, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_standard_identifier_uses_three_digits() {
        let frame = CanFrame {
            flags: 0,
            identifier: 0x325,
            dlc: 8,
            data: vec![0; 8],
        };
        let parsed = CanFrame::parse(&encode_can_payload(&frame)).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.identifier_hex(), "325");
    }

    #[test]
    fn test_dlc_beyond_payload_is_malformed() {
        // 9-byte fixed part plus 2 data bytes, dlc claims 5
        let mut payload = vec![0u8; 11];
        payload[8] = 5;
        assert!(matches!(
            CanFrame::parse(&payload),
            Err(DecoderError::MalformedCanFrame(_))
        ));
    }

    #[test]
    fn test_dlc_above_eight_is_malformed() {
        let mut payload = vec![0u8; 32];
        payload[8] = 9;
        assert!(CanFrame::parse(&payload).is_err());
    }

    #[test]
    fn test_short_payload_is_malformed() {
        assert!(CanFrame::parse(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_malformed_can_degrades_to_raw() {
        let interpreter = PayloadInterpreter::new(ChannelFormat::Can);
        let interpreted = interpreter.interpret(vec![0xFF; 4]);
        assert_eq!(interpreted.view, PayloadView::Raw { bytes: vec![0xFF; 4] });
        assert!(interpreted.malformed.is_some());
    }

    #[test]
    fn test_text_is_trimmed() {
        let record = TextRecord::decode(b"GET /index.html HTTP/1.1\r\n\0\0");
        assert_eq!(record.text, "GET /index.html HTTP/1.1");
        assert!(!record.lossy);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let record = TextRecord::decode(&[b'o', b'k', 0xFF, b'!']);
        assert_eq!(record.text, "ok\u{FFFD}!");
        assert!(record.lossy);
    }

    #[test]
    fn test_dispatch_on_channel_format() {
        let text = PayloadInterpreter::new(ChannelFormat::Text).interpret(b"hello".to_vec());
        assert!(matches!(text.view, PayloadView::Text(_)));

        let adc = PayloadInterpreter::new(ChannelFormat::Adc).interpret(vec![1, 2]);
        assert_eq!(adc.view, PayloadView::Raw { bytes: vec![1, 2] });
        assert!(adc.malformed.is_none());
    }
}
