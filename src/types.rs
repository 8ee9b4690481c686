//! Shared enums used across the pipeline, the analysis code and configuration.
//!
//! # Main Types
//!
//! - [`DecimationMode`] - Downsampling algorithm selector
//! - [`BackpressurePolicy`] - Rule applied when a bounded queue is full
//! - [`IdleStrategy`] - What a worker does while its input queue is empty

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sample rate at or above which LTTB falls back to MinMax (100 MSa/s).
pub const LTTB_HIGH_RATE_THRESHOLD_HZ: f64 = 100_000_000.0;

/// Downsampling algorithm applied to each channel slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DecimationMode {
    /// Passthrough
    None,
    /// Min and max per bucket, preserves peaks
    #[default]
    MinMax,
    /// Largest-Triangle-Three-Buckets
    Lttb,
}

impl DecimationMode {
    /// All modes, in selector order
    pub const ALL: [DecimationMode; 3] = [
        DecimationMode::None,
        DecimationMode::MinMax,
        DecimationMode::Lttb,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            DecimationMode::None => 0,
            DecimationMode::MinMax => 1,
            DecimationMode::Lttb => 2,
        }
    }

    /// Inverse of [`DecimationMode::as_u8`]; unknown values map to MinMax.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DecimationMode::None,
            2 => DecimationMode::Lttb,
            _ => DecimationMode::MinMax,
        }
    }

    /// The mode that actually runs for `requested` at `sample_rate_hz`.
    ///
    /// LTTB is swapped for MinMax at high sample rates; every other mode is
    /// returned unchanged.
    pub fn effective(self, sample_rate_hz: f64) -> Self {
        match self {
            DecimationMode::Lttb if sample_rate_hz >= LTTB_HIGH_RATE_THRESHOLD_HZ => {
                DecimationMode::MinMax
            }
            other => other,
        }
    }
}

impl fmt::Display for DecimationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecimationMode::None => write!(f, "None"),
            DecimationMode::MinMax => write!(f, "MinMax"),
            DecimationMode::Lttb => write!(f, "LTTB"),
        }
    }
}

/// Enqueue behavior of a [`crate::pipeline::BoundedQueue`] at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BackpressurePolicy {
    /// Reject the incoming item
    DropLatest,
    /// Evict the front item, then insert
    #[default]
    DropOldest,
    /// Wait for space or shutdown
    Block,
}

impl fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressurePolicy::DropLatest => write!(f, "DropLatest"),
            BackpressurePolicy::DropOldest => write!(f, "DropOldest"),
            BackpressurePolicy::Block => write!(f, "Block"),
        }
    }
}

/// How a worker waits when it has nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "micros")]
pub enum IdleStrategy {
    /// `std::thread::yield_now`
    #[default]
    Yield,
    /// Sleep for the given number of microseconds
    Sleep(u64),
}

impl IdleStrategy {
    pub fn idle(self) {
        match self {
            IdleStrategy::Yield => std::thread::yield_now(),
            IdleStrategy::Sleep(micros) => std::thread::sleep(Duration::from_micros(micros)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lttb_falls_back_at_high_rate() {
        assert_eq!(
            DecimationMode::Lttb.effective(100_000_000.0),
            DecimationMode::MinMax
        );
        assert_eq!(
            DecimationMode::Lttb.effective(1_000_000_000.0),
            DecimationMode::MinMax
        );
        assert_eq!(
            DecimationMode::Lttb.effective(99_999_999.0),
            DecimationMode::Lttb
        );
    }

    #[test]
    fn test_other_modes_unaffected_by_rate() {
        assert_eq!(
            DecimationMode::None.effective(1e9),
            DecimationMode::None
        );
        assert_eq!(
            DecimationMode::MinMax.effective(1.0),
            DecimationMode::MinMax
        );
    }

    #[test]
    fn test_mode_u8_round_trip() {
        for mode in DecimationMode::ALL {
            assert_eq!(DecimationMode::from_u8(mode.as_u8()), mode);
        }
        assert_eq!(DecimationMode::from_u8(200), DecimationMode::MinMax);
    }

    #[test]
    fn test_display() {
        assert_eq!(DecimationMode::Lttb.to_string(), "LTTB");
        assert_eq!(BackpressurePolicy::Block.to_string(), "Block");
    }
}
