//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use scope_pipeline::pipeline::{BatchView, BatchWriter, ExecContext, Frame, Stage, StageResult};
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Poll `cond` every millisecond until it holds or [`test_timeout`] passes.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// One period of a sine wave
pub fn sine_period(len: usize, amplitude: f64) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let phase = i as f64 / len as f64 * std::f64::consts::TAU;
            (phase.sin() * amplitude).round() as i16
        })
        .collect()
}

/// Source stage emitting single-sample frames with `sequence` `0..count`,
/// then end of stream.
pub struct SequenceSource {
    next: u64,
    count: u64,
}

impl SequenceSource {
    pub fn new(count: u64) -> Self {
        Self { next: 0, count }
    }
}

impl Stage for SequenceSource {
    fn name(&self) -> &str {
        "SequenceSource"
    }

    fn process(
        &mut self,
        _input: &mut BatchView,
        output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        if self.next >= self.count {
            return StageResult::EndOfStream;
        }
        let mut frame = Frame::new(1, 1);
        frame.sequence = self.next;
        self.next += 1;
        output.push(frame);
        StageResult::Ok
    }
}

/// Forwards every input frame unchanged.
pub struct Passthrough;

impl Stage for Passthrough {
    fn name(&self) -> &str {
        "Passthrough"
    }

    fn process(
        &mut self,
        input: &mut BatchView,
        output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        match input.take() {
            Some(frame) => {
                output.push(frame);
                StageResult::Ok
            }
            None => StageResult::NoData,
        }
    }
}

/// Never produces anything and never finishes.
pub struct Idle;

impl Stage for Idle {
    fn name(&self) -> &str {
        "Idle"
    }

    fn process(
        &mut self,
        _input: &mut BatchView,
        _output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        StageResult::NoData
    }
}
