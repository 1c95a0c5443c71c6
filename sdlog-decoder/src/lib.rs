//! QQMLAB Datalog Decoder Library
//!
//! Decodes the framed binary logs written by the QQMLAB CAN/HTTP logger into
//! time-correlated records.
//!
//! # Architecture
//!
//! This library is a pure producer:
//! - Detects and validates one of the supported header layouts
//! - Walks the entry stream, recovering from lost sync by a byte-wise scan
//! - Translates device-monotonic timestamps into relative and epoch time
//! - Interprets payloads as CAN frames or text according to the channel format
//!
//! The library does NOT:
//! - Write CSV or any other output file
//! - Print to the console
//! - Parse command-line arguments
//!
//! All rendering is in the application layer (sdlog-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use sdlog_decoder::{DecoderConfig, LogDecoder, TimeAnchor};
//! use std::path::Path;
//!
//! let config = DecoderConfig::new().with_anchor(TimeAnchor::Header);
//! let mut decoder = LogDecoder::open(Path::new("LOG.TXT"), config).unwrap();
//! println!("Board: {}", decoder.header().board_name);
//!
//! for record in decoder.by_ref() {
//!     match record {
//!         Ok(record) => {
//!             println!("#{} +{:.3}ms {}", record.sequence_number,
//!                 record.relative_time_ms(), record.render_content());
//!         }
//!         Err(e) => eprintln!("Decode error: {}", e),
//!     }
//! }
//!
//! for diagnostic in decoder.take_diagnostics() {
//!     eprintln!("{}", diagnostic);
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod entry;
pub mod header;
pub mod index;
pub mod payload;
pub mod reader;
pub mod schema;
pub mod timestamp;
pub mod types;

// Re-export main types for convenience
pub use config::DecoderConfig;
pub use decoder::{DecodeSummary, DecoderState, LogDecoder};
pub use index::{decode_parallel, EntryIndex, ParallelDecode};
pub use schema::HeaderSchema;
pub use timestamp::{TimeAnchor, TimestampCorrelator};
pub use types::{
    CanFrame, ChannelFormat, DecodedRecord, DecoderError, Diagnostic, Entry, EntryHeader,
    PayloadView, Result, SystemHeader, TextRecord, Timebase, UserMetadata,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_library_basics() {
        // Smoke test: a header-only log decodes to zero records
        let bytes = encoder::encode_header(&encoder::HeaderSpec::default());
        let mut decoder = LogDecoder::from_reader(Cursor::new(bytes), DecoderConfig::new()).unwrap();
        assert!(decoder.next().is_none());
        assert_eq!(decoder.state(), DecoderState::Done);
    }
}
