//! Ingestion side of the pipeline.
//!
//! Raw sample producers implement [`DataSource`]. The pipeline's source stage
//! ([`crate::pipeline::stages::SourceStage`]) pulls [`FrameBuffer`]s from a
//! `DataSource` and turns them into owned frames.
//!
//! # Architecture
//!
//! ```text
//! producer ──► RingFeeder ──► RingBuffer (one per channel) ──► RingSource ──► SourceStage
//!                  │                                              (DataSource)
//!                  └─ DropCounter per channel
//!
//! byte stream ──► WireSource (DataSource)
//! ```
//!
//! The rings decouple a producer running at its own pace from the pipeline.
//! A producer that outruns the consumer sees partial pushes, which are
//! counted as drops, and can throttle itself using the ring fill ratio.

pub mod manual;
pub mod ring_buffer;
pub mod ring_source;
pub mod thread;
pub mod wire;

pub use manual::ManualSource;
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};
pub use ring_source::{ring_link, DropCounter, RingFeeder, RingSource};
pub use thread::{IngestionStats, IngestionThread};
pub use wire::{decode_frame, encode_frame, WireError, WireHeader, WireSinkStage, WireSource};

use crate::error::Result;
use thiserror::Error;

/// Ingestion-side raw frame: channel-major samples plus producer metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameBuffer {
    pub sequence: u64,
    pub producer_ts_ns: u64,
    pub channel_count: u32,
    pub samples_per_channel: u32,
    pub samples: Vec<i16>,
}

impl FrameBuffer {
    /// Samples of one channel, if the buffer holds it completely.
    pub fn channel(&self, ch: usize) -> Option<&[i16]> {
        let spc = self.samples_per_channel as usize;
        if ch >= self.channel_count as usize {
            return None;
        }
        self.samples.get(ch * spc..(ch + 1) * spc)
    }
}

/// Static description of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub channel_count: u32,
    pub sample_rate_hz: f64,
    /// Whether the source produces at wall-clock pace
    pub is_realtime: bool,
}

/// Non-success outcomes of [`DataSource::read_frame`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("no data available")]
    NoData,
    #[error("end of stream")]
    EndOfStream,
    #[error("source error: {0}")]
    Error(String),
}

/// A producer of raw frames.
pub trait DataSource: Send {
    fn info(&self) -> SourceInfo;

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    /// Next frame, or why there is none right now.
    fn read_frame(&mut self) -> std::result::Result<FrameBuffer, ReadError>;
}

impl<S: DataSource + ?Sized> DataSource for Box<S> {
    fn info(&self) -> SourceInfo {
        (**self).info()
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn read_frame(&mut self) -> std::result::Result<FrameBuffer, ReadError> {
        (**self).read_frame()
    }
}

/// Counts sequence numbers skipped by a source.
///
/// A backwards or repeated sequence counts as a gap of one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceTracker {
    expected: Option<u64>,
    total_gaps: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sequence`; returns the gap it reveals (0 when contiguous).
    pub fn observe(&mut self, sequence: u64) -> u64 {
        let gap = match self.expected {
            Some(expected) if sequence > expected => sequence - expected,
            Some(expected) if sequence < expected => 1,
            _ => 0,
        };
        self.total_gaps = self.total_gaps.saturating_add(gap);
        self.expected = Some(sequence.wrapping_add(1));
        gap
    }

    pub fn total_gaps(&self) -> u64 {
        self.total_gaps
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
