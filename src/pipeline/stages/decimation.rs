//! Per-channel decimation as a pipeline stage.

use crate::analysis::decimate::decimate_into;
use crate::pipeline::frame::Frame;
use crate::pipeline::stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
use crate::types::DecimationMode;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default MinMax bucket count (3840 output points per channel).
pub const DEFAULT_TARGET_POINTS: usize = 1920;

#[derive(Debug)]
struct DecimationShared {
    mode: AtomicU8,
    effective_mode: AtomicU8,
    target_points: AtomicUsize,
    sample_rate_bits: AtomicU64,
}

/// Handle for adjusting a running [`DecimationStage`].
///
/// Fields are independent hints read once per frame, so relaxed ordering is
/// enough; no two fields need to be observed together.
#[derive(Debug, Clone)]
pub struct DecimationControl {
    shared: Arc<DecimationShared>,
}

impl DecimationControl {
    fn new(mode: DecimationMode, target_points: usize) -> Self {
        Self {
            shared: Arc::new(DecimationShared {
                mode: AtomicU8::new(mode.as_u8()),
                effective_mode: AtomicU8::new(mode.as_u8()),
                target_points: AtomicUsize::new(target_points),
                sample_rate_bits: AtomicU64::new(0f64.to_bits()),
            }),
        }
    }

    pub fn set_mode(&self, mode: DecimationMode) {
        self.shared.mode.store(mode.as_u8(), Ordering::Relaxed);
    }

    /// The mode requested by the caller.
    pub fn mode(&self) -> DecimationMode {
        DecimationMode::from_u8(self.shared.mode.load(Ordering::Relaxed))
    }

    /// The mode used for the most recent frame.
    pub fn effective_mode(&self) -> DecimationMode {
        DecimationMode::from_u8(self.shared.effective_mode.load(Ordering::Relaxed))
    }

    pub fn set_target_points(&self, target_points: usize) {
        self.shared
            .target_points
            .store(target_points, Ordering::Relaxed);
    }

    pub fn target_points(&self) -> usize {
        self.shared.target_points.load(Ordering::Relaxed)
    }

    /// Rate assumed for frames that carry none. Updated from every frame
    /// that does.
    pub fn set_sample_rate(&self, sample_rate_hz: f64) {
        self.shared
            .sample_rate_bits
            .store(sample_rate_hz.to_bits(), Ordering::Relaxed);
    }

    pub fn sample_rate_hz(&self) -> f64 {
        f64::from_bits(self.shared.sample_rate_bits.load(Ordering::Relaxed))
    }
}

/// Decimates every channel of each frame independently and concatenates the
/// results channel-major into one output frame.
///
/// The output's `sample_rate_hz` is scaled by `output_points / input_points`
/// so `samples_per_channel / sample_rate_hz` still spans the same time.
pub struct DecimationStage {
    control: DecimationControl,
}

impl DecimationStage {
    pub fn new(mode: DecimationMode, target_points: usize) -> Self {
        Self {
            control: DecimationControl::new(mode, target_points),
        }
    }

    pub fn control(&self) -> DecimationControl {
        self.control.clone()
    }

    /// Decimate one frame with the current settings.
    pub fn decimate_frame(&self, input: &Frame) -> Frame {
        let rate = if input.sample_rate_hz > 0.0 {
            self.control.set_sample_rate(input.sample_rate_hz);
            input.sample_rate_hz
        } else {
            self.control.sample_rate_hz()
        };

        let mode = self.control.mode().effective(rate);
        self.control
            .shared
            .effective_mode
            .store(mode.as_u8(), Ordering::Relaxed);
        let target = self.control.target_points();

        let channels = input.channel_count as usize;
        let spc = input.samples_per_channel as usize;
        let mut samples = Vec::new();
        for ch in 0..channels {
            if let Some(slice) = input.channel(ch) {
                decimate_into(slice, mode, target, &mut samples);
            }
        }
        let out_spc = if channels > 0 {
            samples.len() / channels
        } else {
            0
        };

        // Every channel has the same input length, so output lengths match too.
        let mut frame = Frame::from_samples(input.channel_count, out_spc as u32, samples)
            .unwrap_or_else(|_| Frame::new(input.channel_count, 0));
        frame.sequence = input.sequence;
        frame.producer_ts_ns = input.producer_ts_ns;
        frame.first_sample_index = input.first_sample_index;
        frame.flags = input.flags;
        frame.sample_rate_hz = if spc > 0 {
            rate * out_spc as f64 / spc as f64
        } else {
            rate
        };
        frame
    }
}

impl Stage for DecimationStage {
    fn name(&self) -> &str {
        "Decimation"
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
        output.push(self.decimate_frame(&frame));
        StageResult::Ok
    }
}
