//! QQMLAB Datalog Decoder CLI
//!
//! Command-line front end for the sdlog-decoder library. It adds:
//! - Argument and config file handling
//! - Output rendering (CSV, JSON lines, candump, text)
//! - Console reporting of the header and decode diagnostics

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use sdlog_decoder::{decode_parallel, DecoderConfig, DecoderError, Diagnostic, LogDecoder, TimeAnchor};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod report;

use config::AppConfig;
use report::{OutputFormat, RecordWriter};

/// QQMLAB datalog decoder - Decode LOG.TXT recordings
#[derive(Parser, Debug)]
#[command(name = "sdlog-cli")]
#[command(about = "Decode QQMLAB binary datalog files into CSV, JSON or candump", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the binary log file (default: input.file from the config)
    #[arg(value_name = "LOG")]
    log: Option<PathBuf>,

    /// Output file for decoded records (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Reference point for relative timestamps
    #[arg(long, value_enum)]
    anchor: Option<AnchorArg>,

    /// Load the whole file and interpret payloads in parallel
    #[arg(long)]
    parallel: bool,

    /// Maximum number of records to decode
    #[arg(long, value_name = "COUNT")]
    limit: Option<u64>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AnchorArg {
    /// Recording start recorded in the header
    Header,
    /// First decoded entry
    FirstEntry,
}

impl From<AnchorArg> for TimeAnchor {
    fn from(anchor: AnchorArg) -> Self {
        match anchor {
            AnchorArg::Header => TimeAnchor::Header,
            AnchorArg::FirstEntry => TimeAnchor::FirstEntry,
        }
    }
}

/// Fully resolved decode job: config file values overridden by flags
#[derive(Debug, Clone)]
struct Job {
    log: PathBuf,
    output: Option<PathBuf>,
    format: OutputFormat,
    parallel: bool,
    decoder: DecoderConfig,
}

impl Job {
    fn resolve(args: &Args, app: AppConfig) -> Result<Self> {
        let Some(log) = args.log.clone().or(app.input.file) else {
            bail!("No log file given (pass LOG or set input.file in the config)");
        };

        let mut decoder = app.decoder;
        if let Some(anchor) = args.anchor {
            decoder.anchor = anchor.into();
        }
        if let Some(limit) = args.limit {
            decoder.max_records = Some(limit);
        }

        Ok(Self {
            log,
            output: args.output.clone().or(app.output.path),
            format: args.format.unwrap_or(app.output.format),
            parallel: args.parallel || app.input.parallel,
            decoder,
        })
    }
}

/// Result of one decode run
#[derive(Debug, Default)]
struct Outcome {
    records: u64,
    written: u64,
    diagnostics: Vec<Diagnostic>,
    /// Error that ended the entry stream early
    failure: Option<DecoderError>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("QQMLAB Datalog Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using decoder library v{}", sdlog_decoder::VERSION);

    let app = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    let job = Job::resolve(&args, app)?;
    log::debug!("Resolved job: {:?}", job);

    let outcome = run(&job)?;

    for line in report::summarize_diagnostics(&outcome.diagnostics) {
        log::warn!("{}", line);
    }
    log::info!(
        "Decoded {} records, wrote {} ({:?})",
        outcome.records,
        outcome.written,
        job.format
    );

    if let Some(error) = outcome.failure {
        log::error!("Decoding stopped early: {}", error);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Decode the job's log file and write every record
fn run(job: &Job) -> Result<Outcome> {
    if job.parallel {
        run_parallel(job)
    } else {
        run_sequential(job)
    }
}

fn run_sequential(job: &Job) -> Result<Outcome> {
    let mut decoder = LogDecoder::open(&job.log, job.decoder.clone())
        .with_context(|| format!("Failed to decode log file: {:?}", job.log))?;
    log_header(decoder.header(), decoder.timebase());

    let mut writer = open_output(job)?;
    let mut outcome = Outcome::default();
    for result in decoder.by_ref() {
        match result {
            Ok(record) => {
                outcome.records += 1;
                if writer.write(&record)? {
                    outcome.written += 1;
                }
            }
            Err(e) => outcome.failure = Some(e),
        }
    }
    writer.flush()?;

    log::debug!("Decoder finished in state {:?}: {:?}", decoder.state(), decoder.summary());
    outcome.diagnostics = decoder.take_diagnostics();
    Ok(outcome)
}

fn run_parallel(job: &Job) -> Result<Outcome> {
    let bytes =
        fs::read(&job.log).with_context(|| format!("Failed to read log file: {:?}", job.log))?;
    let decoded = decode_parallel(&bytes, &job.decoder)
        .with_context(|| format!("Failed to decode log file: {:?}", job.log))?;
    log_header(&decoded.header, decoded.header.timebase());

    let mut writer = open_output(job)?;
    let mut outcome = Outcome::default();
    for record in &decoded.records {
        outcome.records += 1;
        if writer.write(record)? {
            outcome.written += 1;
        }
    }
    writer.flush()?;

    outcome.diagnostics = decoded.diagnostics;
    outcome.failure = decoded.tail_error;
    Ok(outcome)
}

fn open_output(job: &Job) -> Result<RecordWriter<Box<dyn Write>>> {
    let out: Box<dyn Write> = match &job.output {
        Some(path) => {
            log::info!("Writing {:?} output to {:?}", job.format, path);
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    RecordWriter::new(job.format, out)
}

fn log_header(header: &sdlog_decoder::SystemHeader, timebase: sdlog_decoder::Timebase) {
    for line in report::header_report(header, timebase) {
        log::info!("{}", line);
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
