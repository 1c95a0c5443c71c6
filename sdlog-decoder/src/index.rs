//! Two-pass decoding for bulk files
//!
//! Pass one walks entry headers only, skipping payload bytes, and records
//! where every entry lives. That walk is inherently sequential because each
//! entry's position depends on the previous one. Pass two interprets the
//! indexed payloads in parallel with rayon; records come back in file order
//! and match what [`LogDecoder`](crate::LogDecoder) produces for the same input.

use crate::config::DecoderConfig;
use crate::decoder::assemble_record;
use crate::entry::{EntryDecoder, Located};
use crate::header::read_system_header;
use crate::payload::PayloadInterpreter;
use crate::reader::FrameReader;
use crate::timestamp::TimestampCorrelator;
use crate::types::{DecodedRecord, DecoderError, Diagnostic, Result, SystemHeader};
use rayon::prelude::*;
use std::io::Cursor;

/// Entry locations found by the header scan
#[derive(Debug, Default)]
pub struct EntryIndex {
    pub entries: Vec<Located>,
    /// Desync and trailing-byte diagnostics from the scan
    pub diagnostics: Vec<Diagnostic>,
    /// Set when the scan stopped on a truncated final entry
    pub tail_error: Option<DecoderError>,
}

impl EntryIndex {
    /// Scan the entry stream of an in-memory log
    pub fn scan(bytes: &[u8], header: &SystemHeader, config: &DecoderConfig) -> Result<Self> {
        let mut reader = FrameReader::new(Cursor::new(bytes))?;
        reader.seek_to(header.data_offset)?;
        let decoder = EntryDecoder::new(header.schema.layout().entry, config);

        let mut index = EntryIndex::default();
        loop {
            if config
                .max_records
                .is_some_and(|limit| index.entries.len() as u64 >= limit)
            {
                break;
            }
            match decoder.skip_entry(&mut reader, &mut index.diagnostics) {
                Ok(Some(located)) => index.entries.push(located),
                Ok(None) => break,
                Err(
                    e @ DecoderError::TruncatedEntry {
                        offset,
                        payload_len,
                        available,
                        ..
                    },
                ) => {
                    index.diagnostics.push(Diagnostic::TruncatedTail {
                        offset,
                        payload_len,
                        available,
                    });
                    index.tail_error = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        log::debug!(
            "Indexed {} entries ({} diagnostics)",
            index.entries.len(),
            index.diagnostics.len()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of a parallel decode
#[derive(Debug)]
pub struct ParallelDecode {
    pub header: SystemHeader,
    pub records: Vec<DecodedRecord>,
    /// Scan and payload diagnostics in the order the sequential decoder reports them
    pub diagnostics: Vec<Diagnostic>,
    /// Truncated tail error, if the stream ended that way
    pub tail_error: Option<DecoderError>,
}

/// Decode the payloads of an indexed log in parallel
pub fn decode_indexed(
    bytes: &[u8],
    header: &SystemHeader,
    index: &EntryIndex,
    config: &DecoderConfig,
) -> (Vec<DecodedRecord>, Vec<Diagnostic>) {
    let interpreter = PayloadInterpreter::new(header.channel_format);
    let mut correlator = TimestampCorrelator::new(header, config.anchor);
    if let Some(first) = index.entries.first() {
        // Fix a first-entry anchor before fanning out
        correlator.correlate(first.header.device_time_us);
    }
    let timebase = correlator.timebase();
    let header_len = header.schema.layout().entry.size as u64;

    let results: Vec<(DecodedRecord, Option<Diagnostic>)> = index
        .entries
        .par_iter()
        .enumerate()
        .map(|(i, located)| {
            let start = (located.offset + header_len) as usize;
            let end = start + located.header.payload_len as usize;
            let mut correlator = correlator;
            assemble_record(
                i as u64 + 1,
                located.offset,
                &located.header,
                bytes[start..end].to_vec(),
                correlator.correlate(located.header.device_time_us),
                timebase,
                &interpreter,
            )
        })
        .collect();

    let mut records = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for (record, diagnostic) in results {
        records.push(record);
        diagnostics.extend(diagnostic);
    }
    (records, diagnostics)
}

/// Parse the header, index the entries and decode them in parallel
pub fn decode_parallel(bytes: &[u8], config: &DecoderConfig) -> Result<ParallelDecode> {
    let mut reader = FrameReader::new(Cursor::new(bytes))?;
    let header = read_system_header(&mut reader, config.schema)?;

    let index = EntryIndex::scan(bytes, &header, config)?;
    let (records, payload_diagnostics) = decode_indexed(bytes, &header, &index, config);

    let EntryIndex {
        diagnostics,
        tail_error,
        ..
    } = index;

    Ok(ParallelDecode {
        header,
        records,
        diagnostics: merge_diagnostics(diagnostics, payload_diagnostics),
        tail_error,
    })
}

/// Interleave payload diagnostics into the scan diagnostics
///
/// Scan diagnostics are already in stream order. A payload diagnostic for the
/// entry at offset X goes after every scan diagnostic emitted before that
/// entry was located, which are exactly those with an offset below X.
fn merge_diagnostics(scan: Vec<Diagnostic>, payload: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut merged = Vec::with_capacity(scan.len() + payload.len());
    let mut payload = payload.into_iter().peekable();
    for diagnostic in scan {
        while let Some(next) = payload.next_if(|p| p.offset() < diagnostic.offset()) {
            merged.push(next);
        }
        merged.push(diagnostic);
    }
    merged.extend(payload);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{HeaderSpec, LogEncoder};
    use crate::types::{CanFrame, ChannelFormat};
    use crate::LogDecoder;

    fn can_log() -> LogEncoder {
        let mut encoder = LogEncoder::new(&HeaderSpec {
            epoch_time_us: 1_768_600_000_000_000,
            sys_base_us: 50_000,
            channel_format: ChannelFormat::Can,
            ..HeaderSpec::default()
        });
        for i in 0..32u32 {
            let frame = CanFrame {
                flags: i % 2,
                identifier: 0x100 + i,
                dlc: (i % 9) as u8,
                data: (0..(i % 9) as u8).collect(),
            };
            encoder.push_can_frame(50_000 + u64::from(i) * 1_000, &frame);
        }
        encoder
    }

    #[test]
    fn test_scan_finds_every_entry() {
        let encoder = can_log();
        let bytes = encoder.as_bytes();
        let mut reader = FrameReader::new(Cursor::new(bytes)).unwrap();
        let header = read_system_header(&mut reader, None).unwrap();

        let index = EntryIndex::scan(bytes, &header, &DecoderConfig::new()).unwrap();

        assert_eq!(index.len(), 32);
        assert_eq!(index.entries[0].offset, 1024);
        assert_eq!(index.entries[1].offset, 1024 + 16 + 24);
        assert!(index.diagnostics.is_empty());
        assert!(index.tail_error.is_none());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut encoder = can_log();
        encoder.push_raw(&[0x00, 0x01, 0x02]);
        encoder.push_entry(0, 99_000, &[0u8; 4]);
        let bytes = encoder.into_bytes();

        let sequential: Vec<DecodedRecord> =
            LogDecoder::from_reader(Cursor::new(bytes.clone()), DecoderConfig::new())
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
        let parallel = decode_parallel(&bytes, &DecoderConfig::new()).unwrap();

        assert_eq!(parallel.records, sequential);
        assert_eq!(parallel.diagnostics.len(), 4);
        assert!(matches!(
            parallel.diagnostics.last(),
            Some(Diagnostic::MalformedCanFrame { sequence_number: 33, .. })
        ));
    }

    #[test]
    fn test_parallel_first_entry_anchor() {
        let bytes = can_log().into_bytes();
        let config = DecoderConfig::new().with_anchor(crate::TimeAnchor::FirstEntry);

        let parallel = decode_parallel(&bytes, &config).unwrap();

        assert_eq!(parallel.records[0].relative_time_us, 0);
        assert_eq!(parallel.records[5].relative_time_us, 5_000);
    }

    #[test]
    fn test_parallel_diagnostics_follow_stream_order() {
        let mut encoder = can_log();
        encoder.push_entry(0, 98_000, &[0u8; 4]);
        encoder.push_raw(&[0x11; 24]);
        let bytes = encoder.into_bytes();
        let config = DecoderConfig::new().with_resync_window(8);

        let mut sequential =
            LogDecoder::from_reader(Cursor::new(bytes.clone()), config.clone()).unwrap();
        let records: Vec<DecodedRecord> = sequential.by_ref().map(|r| r.unwrap()).collect();
        let parallel = decode_parallel(&bytes, &config).unwrap();

        assert_eq!(parallel.records, records);
        assert_eq!(parallel.diagnostics, sequential.diagnostics());
        assert_eq!(parallel.diagnostics.len(), 1 + 8 + 1);
        assert!(matches!(
            parallel.diagnostics[0],
            Diagnostic::MalformedCanFrame { sequence_number: 33, .. }
        ));
        assert!(matches!(
            parallel.diagnostics.last(),
            Some(Diagnostic::ResyncAbandoned { scanned: 8, .. })
        ));
    }

    #[test]
    fn test_parallel_truncated_tail() {
        let mut encoder = can_log();
        encoder.push_entry(0, 1, &[0u8; 20]);
        let mut bytes = encoder.into_bytes();
        bytes.truncate(bytes.len() - 10);

        let parallel = decode_parallel(&bytes, &DecoderConfig::new()).unwrap();

        assert_eq!(parallel.records.len(), 32);
        assert!(matches!(
            parallel.tail_error,
            Some(DecoderError::TruncatedEntry { .. })
        ));
        assert!(parallel.diagnostics.last().is_some_and(Diagnostic::is_fatal));
    }
}
