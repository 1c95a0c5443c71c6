//! Main decoder API
//!
//! `LogDecoder` owns the byte source for one decode pass. Opening it parses
//! and validates the header; iterating it yields `DecodedRecord`s lazily until
//! the entry stream ends. Anomalies that do not stop decoding are collected on
//! a separate diagnostic channel.

use crate::config::DecoderConfig;
use crate::entry::EntryDecoder;
use crate::header::read_system_header;
use crate::payload::PayloadInterpreter;
use crate::reader::FrameReader;
use crate::timestamp::{CorrelatedTime, TimestampCorrelator};
use crate::types::{
    DecodedRecord, DecoderError, Diagnostic, EntryHeader, Result, SystemHeader, Timebase,
};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::iter::FusedIterator;
use std::path::Path;

/// Lifecycle of a decode pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderState {
    /// Source opened, header not yet validated
    ///
    /// Header validation happens inside `open`/`from_reader`, which return
    /// the error instead of a decoder, so a constructed `LogDecoder` never
    /// reports this state.
    Start,
    /// Header validated, cursor at the data offset
    HeaderParsed,
    /// At least one entry requested
    Streaming,
    /// Entry stream ended normally
    Done,
    /// Entry stream ended on a truncated tail or I/O failure
    Failed,
}

/// Counters for one decode pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeSummary {
    pub records: u64,
    pub desync_bytes: u64,
    pub malformed_frames: u64,
    pub trailing_bytes: u64,
    pub resyncs_abandoned: u64,
    pub truncated_tail: bool,
}

impl DecodeSummary {
    fn observe(&mut self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::Desync { .. } => self.desync_bytes += 1,
            Diagnostic::ResyncAbandoned { .. } => self.resyncs_abandoned += 1,
            Diagnostic::MalformedCanFrame { .. } => self.malformed_frames += 1,
            Diagnostic::TrailingBytes { len, .. } => self.trailing_bytes += len,
            Diagnostic::TruncatedTail { .. } => self.truncated_tail = true,
        }
    }
}

/// Streaming decoder over one log source
pub struct LogDecoder<R> {
    reader: FrameReader<R>,
    header: SystemHeader,
    config: DecoderConfig,
    entries: EntryDecoder,
    correlator: TimestampCorrelator,
    interpreter: PayloadInterpreter,
    state: DecoderState,
    next_sequence: u64,
    diagnostics: Vec<Diagnostic>,
    summary: DecodeSummary,
}

impl LogDecoder<BufReader<File>> {
    /// Open a log file and validate its header
    ///
    /// # Example
    /// ```no_run
    /// use sdlog_decoder::{DecoderConfig, LogDecoder};
    /// use std::path::Path;
    ///
    /// let decoder = LogDecoder::open(Path::new("LOG.TXT"), DecoderConfig::new()).unwrap();
    /// for record in decoder {
    ///     match record {
    ///         Ok(record) => println!("#{} {}", record.sequence_number, record.render_content()),
    ///         Err(e) => eprintln!("Error: {}", e),
    ///     }
    /// }
    /// ```
    pub fn open(path: &Path, config: DecoderConfig) -> Result<Self> {
        log::info!("Opening log file: {:?}", path);
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), config)
    }
}

impl<R: Read + Seek> LogDecoder<R> {
    /// Wrap any seekable source and validate its header
    pub fn from_reader(source: R, config: DecoderConfig) -> Result<Self> {
        let mut reader = FrameReader::new(source)?;
        log::debug!("Source is {} bytes, validating header", reader.len());

        let header = read_system_header(&mut reader, config.schema)?;

        let layout = header.schema.layout();
        let correlator = TimestampCorrelator::new(&header, config.anchor);
        log::info!(
            "Timebase: {} (anchor {:?}, sys_base {} us, epoch {} us)",
            correlator.timebase(),
            config.anchor,
            header.sys_base_us,
            header.epoch_time_us
        );

        Ok(Self {
            reader,
            entries: EntryDecoder::new(layout.entry, &config),
            correlator,
            interpreter: PayloadInterpreter::new(header.channel_format),
            header,
            config,
            state: DecoderState::HeaderParsed,
            next_sequence: 1,
            diagnostics: Vec::new(),
            summary: DecodeSummary::default(),
        })
    }

    /// Validated file header
    pub fn header(&self) -> &SystemHeader {
        &self.header
    }

    /// Timebase of `absolute_time_us` in the records
    pub fn timebase(&self) -> Timebase {
        self.correlator.timebase()
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Current byte offset of the read cursor
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Diagnostics collected since the last `take_diagnostics`
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Drain the collected diagnostics
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Counters for the pass so far
    pub fn summary(&self) -> &DecodeSummary {
        &self.summary
    }

    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        let mark = self.diagnostics.len();
        let entry = self.entries.next_entry(&mut self.reader, &mut self.diagnostics);
        self.observe_since(mark);

        let Some(entry) = entry? else {
            return Ok(None);
        };

        let sequence_number = self.next_sequence;
        self.next_sequence += 1;

        let time = self.correlator.correlate(entry.header.device_time_us);
        let (record, diagnostic) = assemble_record(
            sequence_number,
            entry.offset,
            &entry.header,
            entry.payload,
            time,
            self.correlator.timebase(),
            &self.interpreter,
        );
        if let Some(diagnostic) = diagnostic {
            self.push_diagnostic(diagnostic);
        }

        self.summary.records += 1;
        Ok(Some(record))
    }

    fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
        self.observe_since(self.diagnostics.len() - 1);
    }

    fn observe_since(&mut self, mark: usize) {
        for diagnostic in &self.diagnostics[mark..] {
            if !matches!(diagnostic, Diagnostic::Desync { .. }) {
                log::debug!("{}", diagnostic);
            }
            self.summary.observe(diagnostic);
        }
    }

    fn fail(&mut self, error: &DecoderError) {
        if let DecoderError::TruncatedEntry {
            offset,
            payload_len,
            available,
            ..
        } = error
        {
            self.push_diagnostic(Diagnostic::TruncatedTail {
                offset: *offset,
                payload_len: *payload_len,
                available: *available,
            });
        }
        log::debug!("Decoder failed at 0x{:X}: {}", self.reader.position(), error);
        self.state = DecoderState::Failed;
    }
}

impl<R: Read + Seek> Iterator for LogDecoder<R> {
    type Item = Result<DecodedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if matches!(self.state, DecoderState::Done | DecoderState::Failed) {
            return None;
        }

        if let Some(limit) = self.config.max_records {
            if self.summary.records >= limit {
                log::debug!("Record limit {} reached", limit);
                self.state = DecoderState::Done;
                return None;
            }
        }

        self.state = DecoderState::Streaming;
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                log::debug!("End of entry stream after {} records", self.summary.records);
                self.state = DecoderState::Done;
                None
            }
            Err(e) => {
                self.fail(&e);
                Some(Err(e))
            }
        }
    }
}

impl<R: Read + Seek> FusedIterator for LogDecoder<R> {}

/// Build a record from a framed entry; also returns the diagnostic for a
/// payload that had to be degraded
pub(crate) fn assemble_record(
    sequence_number: u64,
    file_offset: u64,
    header: &EntryHeader,
    payload: Vec<u8>,
    time: CorrelatedTime,
    timebase: Timebase,
    interpreter: &PayloadInterpreter,
) -> (DecodedRecord, Option<Diagnostic>) {
    let interpreted = interpreter.interpret(payload);
    let diagnostic = interpreted.malformed.map(|e| Diagnostic::MalformedCanFrame {
        offset: file_offset,
        sequence_number,
        reason: match e {
            DecoderError::MalformedCanFrame(reason) => reason,
            other => other.to_string(),
        },
    });

    let record = DecodedRecord {
        sequence_number,
        file_offset,
        device_time_us: header.device_time_us,
        relative_time_us: time.relative_time_us,
        absolute_time_us: time.absolute_time_us,
        timebase,
        entry_type: header.entry_type,
        payload_len: header.payload_len,
        payload: interpreted.view,
    };
    (record, diagnostic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{HeaderSpec, LogEncoder};
    use crate::schema::HeaderSchema;
    use crate::types::{ChannelFormat, PayloadView};
    use std::io::Cursor;

    fn text_log() -> LogEncoder {
        LogEncoder::new(&HeaderSpec {
            epoch_time_us: 1_700_000_000_000_000,
            sys_base_us: 1_000,
            channel_format: ChannelFormat::Text,
            ..HeaderSpec::default()
        })
    }

    #[test]
    fn test_state_transitions() {
        let mut encoder = text_log();
        encoder.push_entry(0, 1_500, b"hello");
        let mut decoder =
            LogDecoder::from_reader(Cursor::new(encoder.into_bytes()), DecoderConfig::new())
                .unwrap();

        assert_eq!(decoder.state(), DecoderState::HeaderParsed);
        assert!(decoder.next().unwrap().is_ok());
        assert_eq!(decoder.state(), DecoderState::Streaming);
        assert!(decoder.next().is_none());
        assert_eq!(decoder.state(), DecoderState::Done);
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_record_fields() {
        let mut encoder = text_log();
        encoder.push_entry(4, 1_500, b"GET /status\n");
        let mut decoder =
            LogDecoder::from_reader(Cursor::new(encoder.into_bytes()), DecoderConfig::new())
                .unwrap();

        let record = decoder.next().unwrap().unwrap();

        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.file_offset, 1024);
        assert_eq!(record.device_time_us, 1_500);
        assert_eq!(record.relative_time_us, 500);
        assert_eq!(record.absolute_time_us, 1_700_000_000_000_500);
        assert_eq!(record.timebase, Timebase::Epoch);
        assert_eq!(record.entry_type, 4);
        assert_eq!(record.payload_len, 12);
        match record.payload {
            PayloadView::Text(text) => assert_eq!(text.text, "GET /status"),
            other => panic!("expected text payload, got {:?}", other),
        }
    }

    #[test]
    fn test_max_records_limit() {
        let mut encoder = text_log();
        for i in 0..5 {
            encoder.push_entry(0, 2_000 + i, b"x");
        }
        let decoder = LogDecoder::from_reader(
            Cursor::new(encoder.into_bytes()),
            DecoderConfig::new().with_max_records(2),
        )
        .unwrap();

        assert_eq!(decoder.count(), 2);
    }

    #[test]
    fn test_malformed_can_frame_is_diagnosed() {
        let mut encoder = LogEncoder::new(&HeaderSpec {
            channel_format: ChannelFormat::Can,
            ..HeaderSpec::default()
        });
        encoder.push_entry(0, 10, &[0u8; 4]);
        let mut decoder =
            LogDecoder::from_reader(Cursor::new(encoder.into_bytes()), DecoderConfig::new())
                .unwrap();

        let record = decoder.next().unwrap().unwrap();

        assert_eq!(record.payload, PayloadView::Raw { bytes: vec![0; 4] });
        assert_eq!(decoder.summary().malformed_frames, 1);
        assert!(matches!(
            decoder.diagnostics(),
            [Diagnostic::MalformedCanFrame { offset: 1024, sequence_number: 1, .. }]
        ));
        assert!(decoder.next().is_none());
        assert_eq!(decoder.state(), DecoderState::Done);
    }

    #[test]
    fn test_forced_schema_mismatch() {
        let bytes = text_log().into_bytes();
        let result = LogDecoder::from_reader(
            Cursor::new(bytes),
            DecoderConfig::new().with_schema(HeaderSchema::Unified),
        );
        assert!(matches!(result, Err(DecoderError::HeaderSchema(_))));
    }

    #[test]
    fn test_open_missing_file() {
        let result = LogDecoder::open(Path::new("nonexistent.log"), DecoderConfig::new());
        assert!(matches!(result, Err(DecoderError::IoError(_))));
    }

    #[test]
    fn test_take_diagnostics_drains() {
        let mut encoder = text_log();
        encoder.push_raw(&[0x01, 0x02]);
        encoder.push_entry(0, 1_000, b"a");
        let mut decoder =
            LogDecoder::from_reader(Cursor::new(encoder.into_bytes()), DecoderConfig::new())
                .unwrap();

        decoder.next().unwrap().unwrap();
        assert_eq!(decoder.take_diagnostics().len(), 2);
        assert!(decoder.diagnostics().is_empty());
        assert_eq!(decoder.summary().desync_bytes, 2);
    }
}
