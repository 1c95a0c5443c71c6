//! Decoder configuration types
//!
//! This module defines the small set of knobs the decoder library exposes.
//! Rendering and output choices belong to the application layer.

use crate::schema::HeaderSchema;
use crate::timestamp::TimeAnchor;
use serde::{Deserialize, Serialize};

/// Configuration for the decoder library
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Reference point for relative timestamps
    #[serde(default)]
    pub anchor: TimeAnchor,

    /// Optional: force a header layout instead of detecting it
    #[serde(default)]
    pub schema: Option<HeaderSchema>,

    /// Maximum bytes to skip per resynchronization (None = until end of file)
    #[serde(default)]
    pub resync_window: Option<u64>,

    /// Optional: payload lengths above this are treated as lost sync
    #[serde(default)]
    pub max_payload_len: Option<u32>,

    /// Optional: stop after this many records
    #[serde(default)]
    pub max_records: Option<u64>,
}

impl DecoderConfig {
    /// Create a new decoder configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the time anchor policy
    pub fn with_anchor(mut self, anchor: TimeAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Builder method: force a header layout
    pub fn with_schema(mut self, schema: HeaderSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Builder method: bound the resynchronization scan
    pub fn with_resync_window(mut self, bytes: u64) -> Self {
        self.resync_window = Some(bytes);
        self
    }

    /// Builder method: set the payload length sanity bound
    pub fn with_max_payload_len(mut self, len: u32) -> Self {
        self.max_payload_len = Some(len);
        self
    }

    /// Builder method: limit the number of decoded records
    pub fn with_max_records(mut self, count: u64) -> Self {
        self.max_records = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_config_builder() {
        let config = DecoderConfig::new()
            .with_anchor(TimeAnchor::FirstEntry)
            .with_schema(HeaderSchema::Unified)
            .with_resync_window(4096)
            .with_max_payload_len(1500)
            .with_max_records(10);

        assert_eq!(config.anchor, TimeAnchor::FirstEntry);
        assert_eq!(config.schema, Some(HeaderSchema::Unified));
        assert_eq!(config.resync_window, Some(4096));
        assert_eq!(config.max_payload_len, Some(1500));
        assert_eq!(config.max_records, Some(10));
    }

    #[test]
    fn test_defaults() {
        let config = DecoderConfig::default();
        assert_eq!(config.anchor, TimeAnchor::Header);
        assert!(config.schema.is_none());
        assert!(config.resync_window.is_none());
    }
}
