//! Worker state, exit notifications and per-stage telemetry snapshots.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle of one stage worker.
///
/// `Idle → Running → Stopping → Stopped`. A worker that exits on its own
/// (end of stream, error) goes straight from `Running` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Running => 1,
            WorkerState::Stopping => 2,
            WorkerState::Stopped => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            3 => WorkerState::Stopped,
            _ => WorkerState::Idle,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    /// The stage returned `EndOfStream`
    EndOfStream,
    /// The stage returned `Error`, or `Retry` twice in a row
    Error,
    /// `on_start` did not return `Ok`
    StartFailed,
    /// Stop flag or input queue shutdown
    Stopped,
    /// The stage panicked; it is not recoverable
    Panicked,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::EndOfStream => "end of stream",
            ExitReason::Error => "error",
            ExitReason::StartFailed => "start failed",
            ExitReason::Stopped => "stopped",
            ExitReason::Panicked => "panicked",
        };
        f.write_str(s)
    }
}

/// Notifications published by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RuntimeEvent {
    WorkerExited {
        stage_index: usize,
        name: String,
        reason: ExitReason,
    },
}

/// Read-only snapshot of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTelemetry {
    pub name: String,
    /// Frames produced by the stage
    pub frames_processed: u64,
    /// Total `process` time divided by frames produced
    pub avg_process_time_ms: f64,
    /// Drops recorded by the stage's input queue (0 for the source)
    pub queue_dropped: u64,
    pub state: WorkerState,
    pub output_queue_len: usize,
}

/// Counters written by one worker and read by the runtime.
#[derive(Debug, Default)]
pub(crate) struct StageCounters {
    frames_processed: AtomicU64,
    total_process_ns: AtomicU64,
    state: AtomicU8,
}

impl StageCounters {
    pub(crate) fn reset(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.total_process_ns.store(0, Ordering::Relaxed);
        self.set_state(WorkerState::Idle);
    }

    pub(crate) fn record(&self, produced: u64, elapsed_ns: u64) {
        self.frames_processed.fetch_add(produced, Ordering::Relaxed);
        self.total_process_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
    }

    pub(crate) fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub(crate) fn avg_process_time_ms(&self) -> f64 {
        let frames = self.frames_processed();
        if frames == 0 {
            return 0.0;
        }
        self.total_process_ns.load(Ordering::Relaxed) as f64 / frames as f64 / 1e6
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Move `Running` to `Stopping`; leaves a worker that already exited alone.
    pub(crate) fn mark_stopping(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Running.as_u8(),
            WorkerState::Stopping.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
