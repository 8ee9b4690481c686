//! Source stage adapting a [`DataSource`] into the pipeline.

use crate::ingest::{DataSource, ReadError, SequenceTracker};
use crate::pipeline::frame::{Frame, FLAG_DISCONTINUITY};
use crate::pipeline::stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SourceCounters {
    frames: AtomicU64,
    sequence_gaps: AtomicU64,
    malformed: AtomicU64,
    last_sequence: AtomicU64,
    sample_rate_bits: AtomicU64,
}

/// Cloneable read-only view of a [`SourceStage`]'s counters.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    inner: Arc<SourceCounters>,
}

impl SourceStats {
    pub fn frames(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    /// Total sequence numbers skipped by the source.
    pub fn sequence_gaps(&self) -> u64 {
        self.inner.sequence_gaps.load(Ordering::Relaxed)
    }

    /// Frames discarded because their sample count did not match their shape.
    pub fn malformed(&self) -> u64 {
        self.inner.malformed.load(Ordering::Relaxed)
    }

    pub fn last_sequence(&self) -> u64 {
        self.inner.last_sequence.load(Ordering::Relaxed)
    }

    pub fn sample_rate_hz(&self) -> f64 {
        f64::from_bits(self.inner.sample_rate_bits.load(Ordering::Relaxed))
    }
}

/// Pulls one frame per call from its source.
///
/// Each frame is stamped with the source's current sample rate and with the
/// running per-channel sample count as `first_sample_index`. A sequence gap
/// advances that index by the missing frames' worth of samples and sets
/// [`FLAG_DISCONTINUITY`] on the frame after the gap.
pub struct SourceStage<S> {
    source: S,
    tracker: SequenceTracker,
    next_sample_index: u64,
    stats: SourceStats,
}

impl<S: DataSource> SourceStage<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            tracker: SequenceTracker::new(),
            next_sample_index: 0,
            stats: SourceStats::default(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: DataSource> Stage for SourceStage<S> {
    fn name(&self) -> &str {
        "Source"
    }

    fn on_start(&mut self, _ctx: &ExecContext) -> StageResult {
        self.tracker.reset();
        self.next_sample_index = 0;
        match self.source.start() {
            Ok(()) => StageResult::Ok,
            Err(e) => {
                tracing::error!("Source failed to start: {}", e);
                StageResult::Error
            }
        }
    }

    fn process(
        &mut self,
        _input: &mut BatchView,
        output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        let buffer = match self.source.read_frame() {
            Ok(buffer) => buffer,
            Err(ReadError::NoData) => return StageResult::NoData,
            Err(ReadError::EndOfStream) => return StageResult::EndOfStream,
            Err(ReadError::Error(e)) => {
                tracing::error!("Source read failed: {}", e);
                return StageResult::Error;
            }
        };

        let spc = buffer.samples_per_channel as u64;
        let gap = self.tracker.observe(buffer.sequence);
        if gap > 0 {
            tracing::debug!("Source sequence gap of {} before {}", gap, buffer.sequence);
            self.next_sample_index = self
                .next_sample_index
                .saturating_add(gap.saturating_mul(spc));
            self.stats
                .inner
                .sequence_gaps
                .store(self.tracker.total_gaps(), Ordering::Relaxed);
        }

        let sequence = buffer.sequence;
        let rate = self.source.info().sample_rate_hz;
        let mut frame = match Frame::from_frame_buffer(buffer, rate, self.next_sample_index) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Discarding malformed source frame {}: {}", sequence, e);
                self.stats.inner.malformed.fetch_add(1, Ordering::Relaxed);
                return StageResult::NoData;
            }
        };
        if gap > 0 {
            frame.flags |= FLAG_DISCONTINUITY;
        }
        self.next_sample_index = self.next_sample_index.saturating_add(spc);

        let counters = &self.stats.inner;
        counters.frames.fetch_add(1, Ordering::Relaxed);
        counters.last_sequence.store(sequence, Ordering::Relaxed);
        counters
            .sample_rate_bits
            .store(rate.to_bits(), Ordering::Relaxed);

        output.push(frame);
        StageResult::Ok
    }

    fn on_stop(&mut self) {
        self.source.stop();
    }
}
