//! Device clock to wall-clock correlation
//!
//! Entries are stamped with a free-running device counter. The header records
//! that counter at recording start (`sys_base_us`) together with the wall-clock
//! time (`epoch_time_us`), which lets each entry be placed on both timebases.

use crate::types::{SystemHeader, Timebase};
use serde::{Deserialize, Serialize};

/// Reference point that relative time is measured from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeAnchor {
    /// `sys_base_us` from the header
    #[default]
    Header,
    /// Device time of the first decoded entry
    FirstEntry,
}

/// Relative and absolute time of one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatedTime {
    pub relative_time_us: i64,
    pub absolute_time_us: i64,
}

/// `relative = device - anchor` and `absolute = epoch + relative`
///
/// Entries stamped before the anchor produce negative relative times.
pub fn correlate(epoch_time_us: u64, anchor_us: u64, device_time_us: u64) -> CorrelatedTime {
    let relative_time_us = device_time_us.wrapping_sub(anchor_us) as i64;
    CorrelatedTime {
        relative_time_us,
        absolute_time_us: (epoch_time_us as i64).wrapping_add(relative_time_us),
    }
}

/// Stateful correlator for one decode pass
#[derive(Debug, Clone, Copy)]
pub struct TimestampCorrelator {
    epoch_time_us: u64,
    timebase: Timebase,
    anchor: TimeAnchor,
    anchor_us: Option<u64>,
}

impl TimestampCorrelator {
    pub fn new(header: &SystemHeader, anchor: TimeAnchor) -> Self {
        let timebase = header.timebase();
        Self {
            epoch_time_us: match timebase {
                Timebase::Epoch => header.epoch_time_us,
                Timebase::Relative => 0,
            },
            timebase,
            anchor,
            anchor_us: match anchor {
                TimeAnchor::Header => Some(header.sys_base_us),
                TimeAnchor::FirstEntry => None,
            },
        }
    }

    /// Timebase of the absolute times this correlator produces
    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    pub fn anchor(&self) -> TimeAnchor {
        self.anchor
    }

    /// Anchor value in device microseconds, once known
    pub fn anchor_us(&self) -> Option<u64> {
        self.anchor_us
    }

    /// Correlate an entry time, fixing the anchor on the first call under
    /// `TimeAnchor::FirstEntry`
    pub fn correlate(&mut self, device_time_us: u64) -> CorrelatedTime {
        let anchor_us = *self.anchor_us.get_or_insert_with(|| {
            log::debug!("Anchoring relative time to first entry at {} us", device_time_us);
            device_time_us
        });
        correlate(self.epoch_time_us, anchor_us, device_time_us)
    }
}
