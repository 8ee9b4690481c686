//! Stage contract.
//!
//! One trait covers all three stage shapes, told apart only by what they do
//! with their batches:
//! - **source**: receives an empty [`BatchView`] and generates frames;
//! - **processing**: consumes the input frame and writes output frames;
//! - **sink**: consumes the input frame and writes nothing.
//!
//! A stage's private state is only touched by its own worker thread, so
//! implementations need no internal locking. State that must be adjusted from
//! outside while the pipeline runs goes through a shared control handle.

use crate::pipeline::frame::Frame;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static NEVER_STOP: AtomicBool = AtomicBool::new(false);

/// Outcome of one `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageResult {
    /// Produced output (possibly none), keep going
    Ok,
    /// Nothing available right now; idle and call again
    NoData,
    /// Source exhausted; the worker exits
    EndOfStream,
    /// Transient failure; the same input is offered once more
    Retry,
    /// Unrecoverable; the worker exits
    Error,
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageResult::Ok => "ok",
            StageResult::NoData => "no data",
            StageResult::EndOfStream => "end of stream",
            StageResult::Retry => "retry",
            StageResult::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-call context handed to a stage.
pub struct ExecContext<'a> {
    /// Monotonic per-stage call counter
    pub iteration: u64,
    /// Position of the stage in the pipeline
    pub stage_index: usize,
    /// Seconds since the pipeline started
    pub wall_time_s: f64,
    stop: &'a AtomicBool,
}

impl<'a> ExecContext<'a> {
    pub fn new(iteration: u64, stage_index: usize, wall_time_s: f64, stop: &'a AtomicBool) -> Self {
        Self {
            iteration,
            stage_index,
            wall_time_s,
            stop,
        }
    }

    /// Context for driving a stage outside a runtime (tests, offline tools).
    pub fn detached(iteration: u64, stage_index: usize) -> ExecContext<'static> {
        ExecContext {
            iteration,
            stage_index,
            wall_time_s: 0.0,
            stop: &NEVER_STOP,
        }
    }

    /// Long-running stages should poll this between work units.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Input frames for one `process` call: zero or one for processing stages,
/// always empty for sources.
#[derive(Debug, Default)]
pub struct BatchView {
    frames: VecDeque<Frame>,
}

impl BatchView {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Take ownership of the next input frame.
    pub fn take(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn take_all(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }
}

/// Append-only sink for produced frames.
///
/// Borrowed frames are materialized on push, so nothing downstream of a stage
/// ever holds a view into memory the stage's input referenced.
#[derive(Debug, Default)]
pub struct BatchWriter {
    frames: Vec<Frame>,
}

impl BatchWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame.into_owned());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn take(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}

/// A processing unit run by one pipeline worker.
pub trait Stage: Send {
    /// Human-readable name, used in telemetry and logs.
    fn name(&self) -> &str;

    /// Called once on the worker thread before the first `process`.
    /// Anything other than `Ok` ends the worker without processing.
    fn on_start(&mut self, _ctx: &ExecContext) -> StageResult {
        StageResult::Ok
    }

    /// Consume `input`, push results into `output`.
    fn process(
        &mut self,
        input: &mut BatchView,
        output: &mut BatchWriter,
        ctx: &ExecContext,
    ) -> StageResult;

    /// Called once on the worker thread after the loop exits, for any reason.
    fn on_stop(&mut self) {}
}
