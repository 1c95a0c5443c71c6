//! Record rendering
//!
//! Turns decoded records into CSV, JSON lines, candump lines or plain text,
//! and prepares the human-readable header and diagnostic reports.

use anyhow::Result;
use clap::ValueEnum;
use sdlog_decoder::{DecodedRecord, Diagnostic, PayloadView, SystemHeader, Timebase};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// CSV column names, in output order
pub const CSV_COLUMNS: [&str; 8] = [
    "sequence_number",
    "file_offset",
    "relative_time_us",
    "relative_time_ms",
    "absolute_time_us",
    "entry_type",
    "payload_len",
    "content",
];

/// Output format for decoded records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One row per record with a header line
    #[default]
    Csv,
    /// One JSON object per line
    Json,
    /// `(secs.micros) can1 ID [dlc] data`, CAN records only
    Candump,
    /// `[absolute_us] content`
    Text,
}

/// Streaming writer for one output format
pub enum RecordWriter<W: Write> {
    Csv(csv::Writer<W>),
    Json(W),
    Candump(W),
    Text(W),
}

impl<W: Write> RecordWriter<W> {
    /// Create a writer; CSV output gets its header row immediately
    pub fn new(format: OutputFormat, out: W) -> Result<Self> {
        Ok(match format {
            OutputFormat::Csv => {
                let mut writer = csv::Writer::from_writer(out);
                writer.write_record(CSV_COLUMNS)?;
                RecordWriter::Csv(writer)
            }
            OutputFormat::Json => RecordWriter::Json(out),
            OutputFormat::Candump => RecordWriter::Candump(out),
            OutputFormat::Text => RecordWriter::Text(out),
        })
    }

    /// Write one record; returns false if the format has no line for it
    pub fn write(&mut self, record: &DecodedRecord) -> Result<bool> {
        match self {
            RecordWriter::Csv(writer) => {
                writer.write_record(&[
                    record.sequence_number.to_string(),
                    format!("0x{:X}", record.file_offset),
                    record.relative_time_us.to_string(),
                    format!("{:.3}", record.relative_time_ms()),
                    record.absolute_time_us.to_string(),
                    record.entry_type.to_string(),
                    record.payload_len.to_string(),
                    record.render_content(),
                ])?;
            }
            RecordWriter::Json(out) => {
                serde_json::to_writer(&mut *out, record)?;
                writeln!(out)?;
            }
            RecordWriter::Candump(out) => match candump_line(record) {
                Some(line) => writeln!(out, "{}", line)?,
                None => return Ok(false),
            },
            RecordWriter::Text(out) => {
                writeln!(out, "[{}] {}", record.absolute_time_us, record.render_content())?;
            }
        }
        Ok(true)
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        match self {
            RecordWriter::Csv(writer) => writer.flush()?,
            RecordWriter::Json(out) | RecordWriter::Candump(out) | RecordWriter::Text(out) => {
                out.flush()?
            }
        }
        Ok(())
    }
}

/// candump log line for a CAN record
pub fn candump_line(record: &DecodedRecord) -> Option<String> {
    let PayloadView::Can(frame) = &record.payload else {
        return None;
    };
    let sign = if record.absolute_time_us < 0 { "-" } else { "" };
    let magnitude = record.absolute_time_us.unsigned_abs();
    Some(format!(
        "({}{}.{:06}) can1 {}",
        sign,
        magnitude / 1_000_000,
        magnitude % 1_000_000,
        frame
    ))
}

/// Human-readable summary of a validated header
pub fn header_report(header: &SystemHeader, timebase: Timebase) -> Vec<String> {
    let mut lines = vec![
        format!("Magic:      {} ({} layout)", header.magic, header.schema),
        format!("Version:    {}", header.version),
        format!("Board:      {}", header.board_name),
        format!("Firmware:   {}", header.firmware_version),
        format!("Channel:    {}", header.channel_format),
        format!("Data start: 0x{:X}", header.data_offset),
    ];
    if let Some(metadata) = &header.metadata {
        lines.push(format!("Metadata:   {}", metadata.description));
    }
    lines.push(match timebase {
        Timebase::Epoch => {
            let created = chrono::DateTime::from_timestamp_micros(header.epoch_time_us as i64)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| header.epoch_time_us.to_string());
            format!("Timebase:   epoch (created {})", created)
        }
        Timebase::Relative => "Timebase:   relative (no epoch in header)".to_string(),
    });
    lines
}

/// Diagnostic messages with consecutive skipped bytes folded into one line
pub fn summarize_diagnostics(diagnostics: &[Diagnostic]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut run: Option<(u64, u64)> = None;

    for diagnostic in diagnostics {
        if let Diagnostic::Desync { offset, .. } = diagnostic {
            match &mut run {
                Some((start, len)) if *start + *len == *offset => *len += 1,
                _ => {
                    lines.extend(run.take().map(desync_line));
                    run = Some((*offset, 1));
                }
            }
            continue;
        }
        lines.extend(run.take().map(desync_line));
        lines.push(diagnostic.to_string());
    }
    lines.extend(run.map(desync_line));
    lines
}

fn desync_line((offset, len): (u64, u64)) -> String {
    format!(
        "0x{:06X}: lost sync, skipped {} byte{} before next entry",
        offset,
        len,
        if len == 1 { "" } else { "s" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdlog_decoder::{CanFrame, TextRecord};

    fn record(payload: PayloadView) -> DecodedRecord {
        DecodedRecord {
            sequence_number: 7,
            file_offset: 0x438,
            device_time_us: 1_002_500,
            relative_time_us: 2_500,
            absolute_time_us: 1_768_608_000_002_500,
            timebase: Timebase::Epoch,
            entry_type: 0,
            payload_len: 20,
            payload,
        }
    }

    fn can_record() -> DecodedRecord {
        record(PayloadView::Can(CanFrame {
            flags: 0,
            identifier: 0x7DF,
            dlc: 2,
            data: vec![0x02, 0x01],
        }))
    }

    fn render(format: OutputFormat, records: &[DecodedRecord]) -> String {
        let mut out = Vec::new();
        {
            let mut writer = RecordWriter::new(format, &mut out).unwrap();
            for record in records {
                writer.write(record).unwrap();
            }
            writer.flush().unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_csv_output() {
        let text = record(PayloadView::Text(TextRecord {
            text: "GET /, status".to_string(),
            lossy: false,
        }));
        let output = render(OutputFormat::Csv, &[can_record(), text]);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], CSV_COLUMNS.join(","));
        assert_eq!(
            lines[1],
            "7,0x438,2500,2.500,1768608000002500,0,20,7DF [2] 02 01"
        );
        assert_eq!(
            lines[2],
            "7,0x438,2500,2.500,1768608000002500,0,20,\"GET /, status\""
        );
    }

    #[test]
    fn test_csv_header_without_records() {
        assert_eq!(render(OutputFormat::Csv, &[]).trim_end(), CSV_COLUMNS.join(","));
    }

    #[test]
    fn test_candump_output() {
        let raw = record(PayloadView::Raw { bytes: vec![1, 2] });
        let output = render(OutputFormat::Candump, &[can_record(), raw]);

        assert_eq!(output, "(1768608000.002500) can1 7DF [2] 02 01\n");
    }

    #[test]
    fn test_candump_negative_time() {
        let mut record = can_record();
        record.timebase = Timebase::Relative;
        record.absolute_time_us = -1_500;
        assert_eq!(
            candump_line(&record).unwrap(),
            "(-0.001500) can1 7DF [2] 02 01"
        );

        record.absolute_time_us = -2_000_001;
        assert_eq!(
            candump_line(&record).unwrap(),
            "(-2.000001) can1 7DF [2] 02 01"
        );
    }

    #[test]
    fn test_text_and_json_output() {
        let text = render(OutputFormat::Text, &[can_record()]);
        assert_eq!(text, "[1768608000002500] 7DF [2] 02 01\n");

        let json = render(OutputFormat::Json, &[can_record()]);
        let value: serde_json::Value = serde_json::from_str(json.trim_end()).unwrap();
        assert_eq!(value["sequence_number"], 7);
        assert_eq!(value["payload"]["kind"], "can");
        assert_eq!(value["payload"]["identifier"], 0x7DF);
    }

    #[test]
    fn test_desync_runs_are_folded() {
        let diagnostics = vec![
            Diagnostic::Desync { offset: 100, byte: 0 },
            Diagnostic::Desync { offset: 101, byte: 0 },
            Diagnostic::Desync { offset: 102, byte: 0 },
            Diagnostic::TrailingBytes { offset: 200, len: 3 },
            Diagnostic::Desync { offset: 150, byte: 0 },
        ];
        let lines = summarize_diagnostics(&diagnostics);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0x000064: lost sync, skipped 3 bytes before next entry");
        assert!(lines[1].contains("trailing bytes"));
        assert_eq!(lines[2], "0x000096: lost sync, skipped 1 byte before next entry");
    }
}
