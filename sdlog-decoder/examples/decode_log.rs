//! Standalone datalog inspector
//!
//! Decodes a QQMLAB log file and prints the header, every record and a
//! summary of what was found.
//!
//! Usage:
//!   decode_log <LOG.TXT> [--limit <count>] [--first-entry] [--quiet]

use sdlog_decoder::{DecoderConfig, LogDecoder, PayloadView, TimeAnchor};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

#[derive(Default)]
struct Stats {
    can_frames: usize,
    text_lines: usize,
    raw_payloads: usize,
    per_entry_type: BTreeMap<u8, usize>,
    per_can_id: BTreeMap<String, usize>,
}

impl Stats {
    fn print_summary(&self) {
        println!("\n=== DECODING SUMMARY ===");
        println!("CAN frames:   {}", self.can_frames);
        println!("Text lines:   {}", self.text_lines);
        println!("Raw payloads: {}", self.raw_payloads);
        for (entry_type, count) in &self.per_entry_type {
            println!("  entry type {}: {}", entry_type, count);
        }

        if !self.per_can_id.is_empty() {
            println!("\nTop 10 CAN identifiers:");
            let mut sorted: Vec<_> = self.per_can_id.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1));
            for (id, count) in sorted.iter().take(10) {
                println!("  {}: {} frames", id, count);
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <LOG.TXT> [--limit <count>] [--first-entry] [--quiet]", args[0]);
        std::process::exit(1);
    }

    let log_file = PathBuf::from(&args[1]);
    let mut config = DecoderConfig::new();
    let mut quiet = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" => {
                i += 1;
                if let Some(value) = args.get(i) {
                    config = config.with_max_records(value.parse()?);
                }
            }
            "--first-entry" => config = config.with_anchor(TimeAnchor::FirstEntry),
            "--quiet" => quiet = true,
            other => eprintln!("Ignoring unknown argument: {}", other),
        }
        i += 1;
    }

    let mut decoder = LogDecoder::open(&log_file, config)?;
    let header = decoder.header().clone();
    println!("=== {} ===", log_file.display());
    println!("Layout:   {}", header.schema);
    println!("Board:    {} (firmware {})", header.board_name, header.firmware_version);
    println!("Channel:  {}", header.channel_format);
    println!("Timebase: {}", decoder.timebase());
    if let Some(metadata) = &header.metadata {
        println!("Metadata: {}", metadata.description);
    }
    println!();

    let mut stats = Stats::default();
    for result in decoder.by_ref() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                eprintln!("Decoding stopped: {}", e);
                break;
            }
        };

        *stats.per_entry_type.entry(record.entry_type).or_default() += 1;
        match &record.payload {
            PayloadView::Can(frame) => {
                stats.can_frames += 1;
                *stats.per_can_id.entry(frame.identifier_hex()).or_default() += 1;
            }
            PayloadView::Text(_) => stats.text_lines += 1,
            PayloadView::Raw { .. } => stats.raw_payloads += 1,
        }

        if !quiet {
            match record.absolute_datetime() {
                Some(time) => print!("{} ", time.format("%H:%M:%S%.6f")),
                None => print!("+{:.3}ms ", record.relative_time_ms()),
            }
            println!("#{} {}", record.sequence_number, record.render_content());
        }
    }

    stats.print_summary();

    let diagnostics = decoder.take_diagnostics();
    if !diagnostics.is_empty() {
        println!("\n{} diagnostics:", diagnostics.len());
        for diagnostic in diagnostics.iter().take(20) {
            println!("  {}", diagnostic);
        }
    }
    println!("\nSummary: {:?}", decoder.summary());

    Ok(())
}
