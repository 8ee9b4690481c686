//! Configuration sections
//!
//! Each section maps onto one part of the pipeline:
//!
//! - [`RuntimeSettings`] - Worker idle strategy and log filter
//! - [`IngestSettings`] - Channel layout, ring sizing and the source's output queue
//! - [`DecimationSettings`] - Requested algorithm and bucket count
//! - [`VisualizationSettings`] - Display budget, visible span and debug dump
//! - [`DemoSettings`] - Synthetic test tone used by the binary
//!
//! Every section has `#[serde(default)]`, so a config file only needs the
//! keys it changes.

use crate::pipeline::executor::StageOptions;
use crate::pipeline::stages::{
    DEFAULT_DISPLAY_POINTS, DEFAULT_TARGET_POINTS, DEFAULT_VISIBLE_SPAN_S,
};
use crate::types::{BackpressurePolicy, DecimationMode, IdleStrategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info,scope_pipeline=debug";

/// Default capacity of every stage output queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Largest supported channel count
pub const MAX_CHANNELS: u32 = 8;

/// Worker behaviour and logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,

    /// What a worker does when it has nothing to process
    pub idle: IdleStrategy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            idle: IdleStrategy::default(),
        }
    }
}

/// Output queue of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl QueueSettings {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self { capacity, policy }
    }

    pub fn options(&self) -> StageOptions {
        StageOptions::new(self.capacity, self.policy)
    }
}

/// Acquisition side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Number of channels (1..=8)
    pub channel_count: u32,

    /// Sample rate in Hz
    pub sample_rate_hz: f64,

    /// Per-channel ring capacity in samples
    pub ring_capacity: usize,

    /// Samples per channel in each frame read from the rings
    pub block_samples: usize,

    /// Source stage output queue
    pub queue: QueueSettings,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            channel_count: 2,
            sample_rate_hz: 1_000_000.0,
            ring_capacity: 1 << 20,
            block_samples: 8192,
            queue: QueueSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationSettings {
    /// Requested algorithm; LTTB falls back to MinMax at high rates
    pub mode: DecimationMode,

    /// MinMax bucket count / LTTB output count per channel
    pub target_points: usize,

    pub queue: QueueSettings,
}

impl Default for DecimationSettings {
    fn default() -> Self {
        Self {
            mode: DecimationMode::MinMax,
            target_points: DEFAULT_TARGET_POINTS,
            queue: QueueSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationSettings {
    /// Maximum points per channel in a display frame
    pub display_points: usize,

    /// Visible time span in seconds
    pub visible_time_span_s: f64,

    /// Write one CSV dump of the first produced window here
    pub debug_dump_dir: Option<PathBuf>,

    /// Output queue read by the display side
    pub queue: QueueSettings,
}

impl Default for VisualizationSettings {
    fn default() -> Self {
        Self {
            display_points: DEFAULT_DISPLAY_POINTS,
            visible_time_span_s: DEFAULT_VISIBLE_SPAN_S,
            debug_dump_dir: None,
            queue: QueueSettings::new(4, BackpressurePolicy::DropOldest),
        }
    }
}

/// Synthetic signal fed by the demo binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// How long the demo runs, in seconds
    pub duration_s: f64,

    /// Length of one tone period in samples
    pub period_samples: usize,

    /// Peak amplitude in LSB
    pub amplitude: i16,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            duration_s: 2.0,
            period_samples: 1000,
            amplitude: 16_000,
        }
    }
}
