//! Passthrough stage checking MinMax output against a known periodic input.

use crate::analysis::envelope::{EnvelopeReport, EnvelopeVerifier};
use crate::pipeline::stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct CheckCounters {
    frames_checked: AtomicU64,
    frames_skipped: AtomicU64,
    total_buckets: AtomicU64,
    matched_buckets: AtomicU64,
}

/// Running totals of an [`EnvelopeCheckStage`].
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCheckStats {
    inner: Arc<CheckCounters>,
}

impl EnvelopeCheckStats {
    pub fn frames_checked(&self) -> u64 {
        self.inner.frames_checked.load(Ordering::Relaxed)
    }

    /// Frames whose shape did not match the expected MinMax output.
    pub fn frames_skipped(&self) -> u64 {
        self.inner.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn total_buckets(&self) -> u64 {
        self.inner.total_buckets.load(Ordering::Relaxed)
    }

    pub fn matched_buckets(&self) -> u64 {
        self.inner.matched_buckets.load(Ordering::Relaxed)
    }

    /// Matched over total buckets, or `-1.0` before anything was checked.
    pub fn match_rate(&self) -> f64 {
        let total = self.total_buckets();
        if total == 0 {
            return -1.0;
        }
        self.matched_buckets() as f64 / total as f64
    }

    fn record(&self, report: &EnvelopeReport) {
        self.inner
            .total_buckets
            .fetch_add(report.total_buckets as u64, Ordering::Relaxed);
        self.inner
            .matched_buckets
            .fetch_add(report.matched_buckets as u64, Ordering::Relaxed);
    }
}

/// Sits after a MinMax decimation stage fed with a periodic test signal and
/// verifies every channel of every frame, forwarding frames unchanged.
///
/// Only frames with exactly `2 * buckets` samples per channel are checked;
/// anything else (passthrough, LTTB) is counted as skipped.
pub struct EnvelopeCheckStage {
    verifier: EnvelopeVerifier,
    raw_samples_per_frame: usize,
    buckets: usize,
    stats: EnvelopeCheckStats,
}

impl EnvelopeCheckStage {
    pub fn new(period: &[i16], raw_samples_per_frame: usize, buckets: usize) -> Self {
        Self::with_verifier(EnvelopeVerifier::new(), period, raw_samples_per_frame, buckets)
    }

    pub fn with_verifier(
        mut verifier: EnvelopeVerifier,
        period: &[i16],
        raw_samples_per_frame: usize,
        buckets: usize,
    ) -> Self {
        verifier.set_period(period);
        Self {
            verifier,
            raw_samples_per_frame,
            buckets,
            stats: EnvelopeCheckStats::default(),
        }
    }

    pub fn stats(&self) -> EnvelopeCheckStats {
        self.stats.clone()
    }
}

impl Stage for EnvelopeCheckStage {
    fn name(&self) -> &str {
        "EnvelopeCheck"
    }

    fn process(
        &mut self,
        input: &mut BatchView,
        output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        let Some(frame) = input.take() else {
            return StageResult::NoData;
        };

        let counters = &self.stats.inner;
        if self.buckets == 0 || frame.samples_per_channel as usize != self.buckets * 2 {
            counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
        } else {
            for ch in 0..frame.channel_count as usize {
                let Some(samples) = frame.channel(ch) else {
                    continue;
                };
                let report = self
                    .verifier
                    .verify(samples, self.buckets, self.raw_samples_per_frame);
                if !report.is_skipped() {
                    self.stats.record(&report);
                }
            }
            counters.frames_checked.fetch_add(1, Ordering::Relaxed);
        }

        output.push(frame);
        StageResult::Ok
    }
}
