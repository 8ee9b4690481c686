//! Pipeline runtime: one worker thread per stage, bounded queues in between.
//!
//! Each worker loops:
//! 1. Dequeue one frame from its input queue (stage 0 gets an empty batch).
//! 2. Call `process`, timing the call.
//! 3. Enqueue everything the stage produced into its own output queue.
//! 4. Act on the [`StageResult`]: idle on `NoData`, re-offer once on `Retry`,
//!    exit on `EndOfStream` or `Error`.
//!
//! A worker that exits on its own only stops its stage. Upstream keeps
//! feeding a queue nobody drains (its drop policy absorbs the overflow) and
//! downstream simply runs dry. [`PipelineRuntime::stop`] sets the stop flag,
//! shuts every queue down and joins all workers.

use crate::config::PipelineConfig;
use crate::ingest::DataSource;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::Frame;
use crate::pipeline::queue::{BoundedQueue, QueueError, QueueStats};
use crate::pipeline::stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
use crate::pipeline::stages::{
    DecimationControl, DecimationStage, SourceStage, SourceStats, VisualizationControl,
    VisualizationStage,
};
use crate::pipeline::telemetry::{
    ExitReason, RuntimeEvent, StageCounters, StageTelemetry, WorkerState,
};
use crate::types::{BackpressurePolicy, IdleStrategy};
use crossbeam_channel::{Receiver, Sender};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Output queue settings for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOptions {
    pub queue_capacity: usize,
    pub policy: BackpressurePolicy,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl StageOptions {
    pub fn new(queue_capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            queue_capacity,
            policy,
        }
    }
}

type StageBox = Box<dyn Stage>;

/// A stage together with its bookkeeping. `stage` is `None` while a worker
/// owns it, and stays `None` if that worker panicked.
struct StageSlot {
    name: String,
    stage: Option<StageBox>,
    options: StageOptions,
    counters: Arc<StageCounters>,
    handle: Option<JoinHandle<Option<StageBox>>>,
}

pub struct PipelineRuntime {
    slots: Vec<StageSlot>,
    /// `queues[i]` is stage `i`'s output and stage `i + 1`'s input.
    queues: Vec<Arc<BoundedQueue<Frame>>>,
    stop: Arc<AtomicBool>,
    idle: IdleStrategy,
    events_tx: Sender<RuntimeEvent>,
    events_rx: Receiver<RuntimeEvent>,
    running: bool,
}

impl Default for PipelineRuntime {
    fn default() -> Self {
        Self::new(IdleStrategy::default())
    }
}

impl PipelineRuntime {
    pub fn new(idle: IdleStrategy) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            slots: Vec::new(),
            queues: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            idle,
            events_tx,
            events_rx,
            running: false,
        }
    }

    // ── Building ──

    /// Append a stage. Returns its index.
    pub fn add_stage<S: Stage + 'static>(
        &mut self,
        stage: S,
        options: StageOptions,
    ) -> PipelineResult<usize> {
        self.add_boxed_stage(Box::new(stage), options)
    }

    pub fn add_boxed_stage(
        &mut self,
        stage: Box<dyn Stage>,
        options: StageOptions,
    ) -> PipelineResult<usize> {
        if self.running {
            return Err(PipelineError::AlreadyRunning);
        }
        let index = self.slots.len();
        self.slots.push(StageSlot {
            name: stage.name().to_string(),
            stage: Some(stage),
            options,
            counters: Arc::new(StageCounters::default()),
            handle: None,
        });
        Ok(index)
    }

    pub fn stage_count(&self) -> usize {
        self.slots.len()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    // ── Lifecycle ──

    /// Spawn one worker per stage with fresh queues and counters.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.running {
            return Err(PipelineError::AlreadyRunning);
        }
        if self.slots.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }
        if let Some(lost) = self.slots.iter().find(|s| s.stage.is_none()) {
            return Err(PipelineError::StageLost(lost.name.clone()));
        }

        self.stop.store(false, Ordering::Relaxed);
        self.queues = self
            .slots
            .iter()
            .map(|s| {
                Arc::new(BoundedQueue::new(
                    s.options.queue_capacity,
                    s.options.policy,
                ))
            })
            .collect();

        let started = Instant::now();
        self.running = true;
        for index in 0..self.slots.len() {
            if let Err(e) = self.spawn_worker(index, started) {
                tracing::error!("Failed to spawn worker for stage {}: {}", index, e);
                self.stop();
                return Err(e);
            }
        }

        tracing::info!(
            "Pipeline started with {} stages: {}",
            self.slots.len(),
            self.stage_names().join(" -> ")
        );
        Ok(())
    }

    fn spawn_worker(&mut self, index: usize, started: Instant) -> PipelineResult<()> {
        let input = index.checked_sub(1).map(|i| self.queues[i].clone());
        let output = self.queues[index].clone();
        let slot = &mut self.slots[index];
        let Some(stage) = slot.stage.take() else {
            return Err(PipelineError::StageLost(slot.name.clone()));
        };
        slot.counters.reset();

        let worker = Worker {
            index,
            name: slot.name.clone(),
            input,
            output,
            stop: self.stop.clone(),
            counters: slot.counters.clone(),
            idle: self.idle,
            events: self.events_tx.clone(),
            started,
        };

        let handle = std::thread::Builder::new()
            .name(format!("stage-{}-{}", index, slot.name))
            .spawn(move || worker.run(stage))?;
        slot.handle = Some(handle);
        Ok(())
    }

    /// Stop every worker and wait for them. Idempotent.
    ///
    /// Queued frames stay in the queues, so the output can still be drained
    /// with [`poll_output`](Self::poll_output) afterwards.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.stop.store(true, Ordering::Relaxed);
        for slot in &self.slots {
            slot.counters.mark_stopping();
        }
        for queue in &self.queues {
            queue.shutdown();
        }

        for slot in &mut self.slots {
            let Some(handle) = slot.handle.take() else {
                continue;
            };
            match handle.join() {
                Ok(stage) => slot.stage = stage,
                Err(_) => tracing::warn!("Worker for stage '{}' could not be joined", slot.name),
            }
            slot.counters.set_state(WorkerState::Stopped);
        }

        self.running = false;
        tracing::info!("Pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether every worker has left its loop (all exited on their own, or
    /// the runtime is stopped).
    pub fn is_finished(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.handle.as_ref().map_or(true, JoinHandle::is_finished))
    }

    // ── Output ──

    /// Oldest frame waiting in the last stage's output queue.
    pub fn poll_output(&self) -> Option<Frame> {
        self.queues.last()?.dequeue()
    }

    /// Drain the last stage's output queue, returning only the newest frame.
    pub fn poll_latest(&self) -> Option<Frame> {
        self.queues.last()?.dequeue_latest()
    }

    /// Output queue of stage `index` (exists once the runtime has started).
    pub fn output_queue(&self, index: usize) -> Option<Arc<BoundedQueue<Frame>>> {
        self.queues.get(index).cloned()
    }

    // ── Observation ──

    /// Exit notifications for every worker, across restarts.
    pub fn events(&self) -> Receiver<RuntimeEvent> {
        self.events_rx.clone()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|s| s.counters.state()).collect()
    }

    pub fn queue_stats(&self) -> Vec<QueueStats> {
        self.queues.iter().map(|q| q.stats()).collect()
    }

    pub fn telemetry(&self) -> Vec<StageTelemetry> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| StageTelemetry {
                name: slot.name.clone(),
                frames_processed: slot.counters.frames_processed(),
                avg_process_time_ms: slot.counters.avg_process_time_ms(),
                queue_dropped: i
                    .checked_sub(1)
                    .and_then(|prev| self.queues.get(prev))
                    .map_or(0, |q| q.total_dropped()),
                state: slot.counters.state(),
                output_queue_len: self.queues.get(i).map_or(0, |q| q.len()),
            })
            .collect()
    }
}

impl Drop for PipelineRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything one worker thread needs besides its stage.
struct Worker {
    index: usize,
    name: String,
    input: Option<Arc<BoundedQueue<Frame>>>,
    output: Arc<BoundedQueue<Frame>>,
    stop: Arc<AtomicBool>,
    counters: Arc<StageCounters>,
    idle: IdleStrategy,
    events: Sender<RuntimeEvent>,
    started: Instant,
}

impl Worker {
    /// Thread body. Returns the stage unless it panicked.
    fn run(self, mut stage: StageBox) -> Option<StageBox> {
        self.counters.set_state(WorkerState::Running);

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let reason = self.drive(stage.as_mut());
            stage.on_stop();
            reason
        }));

        let (reason, stage) = match outcome {
            Ok(reason) => (reason, Some(stage)),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::warn!("Stage '{}' panicked: {}", self.name, message);
                (ExitReason::Panicked, None)
            }
        };

        match reason {
            ExitReason::Error | ExitReason::StartFailed => {
                tracing::error!("Stage '{}' exited: {}", self.name, reason)
            }
            ExitReason::Panicked => {}
            _ => tracing::debug!("Stage '{}' exited: {}", self.name, reason),
        }

        self.counters.set_state(WorkerState::Stopped);
        let _ = self.events.send(RuntimeEvent::WorkerExited {
            stage_index: self.index,
            name: self.name.clone(),
            reason,
        });
        stage
    }

    fn drive(&self, stage: &mut dyn Stage) -> ExitReason {
        let start_ctx = ExecContext::new(0, self.index, 0.0, &self.stop);
        if stage.on_start(&start_ctx) != StageResult::Ok {
            return ExitReason::StartFailed;
        }

        let mut iteration = 0u64;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return ExitReason::Stopped;
            }

            let mut batch = match &self.input {
                None => BatchView::empty(),
                Some(queue) => match queue.dequeue() {
                    Some(frame) => BatchView::new([frame]),
                    None if queue.is_shutdown() => return ExitReason::Stopped,
                    None => {
                        self.idle.idle();
                        continue;
                    }
                },
            };

            let mut retried = false;
            let result = loop {
                let result = self.process_once(stage, &mut batch, iteration);
                iteration += 1;
                if result != StageResult::Retry {
                    break result;
                }
                if retried {
                    tracing::warn!("Stage '{}' failed its retry", self.name);
                    break StageResult::Error;
                }
                if self.stop.load(Ordering::Relaxed) {
                    return ExitReason::Stopped;
                }
                retried = true;
            };

            match result {
                StageResult::Ok | StageResult::Retry => {}
                StageResult::NoData => self.idle.idle(),
                StageResult::EndOfStream => return ExitReason::EndOfStream,
                StageResult::Error => return ExitReason::Error,
            }
        }
    }

    fn process_once(
        &self,
        stage: &mut dyn Stage,
        batch: &mut BatchView,
        iteration: u64,
    ) -> StageResult {
        let ctx = ExecContext::new(
            iteration,
            self.index,
            self.started.elapsed().as_secs_f64(),
            &self.stop,
        );
        let mut produced = BatchWriter::new();

        let t0 = Instant::now();
        let result = stage.process(batch, &mut produced, &ctx);
        let elapsed_ns = t0.elapsed().as_nanos() as u64;

        let frames = produced.take();
        self.counters.record(frames.len() as u64, elapsed_ns);
        for frame in frames {
            match self.output.enqueue(frame) {
                Ok(()) => {}
                Err(QueueError::Full) => {
                    tracing::trace!("Stage '{}' output full, frame dropped", self.name)
                }
                Err(QueueError::Shutdown) => break,
            }
        }
        result
    }
}

/// Control handles for the stages of [`PipelineBuilder::build_default`].
#[derive(Debug, Clone)]
pub struct PipelineHandles {
    pub source: SourceStats,
    pub decimation: DecimationControl,
    pub visualization: VisualizationControl,
}

/// Assembles the standard processing chain from a [`PipelineConfig`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    taps: Vec<(StageBox, StageOptions)>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            taps: Vec::new(),
        }
    }

    /// Insert a stage between decimation and visualization. Taps run in the
    /// order they were added and must forward the frames they receive.
    pub fn with_tap<S: Stage + 'static>(mut self, stage: S, options: StageOptions) -> Self {
        self.taps.push((Box::new(stage), options));
        self
    }

    /// Build the default pipeline:
    /// ```text
    /// Source → Decimation → [taps] → Visualization
    /// ```
    /// The visualization output queue is the one read by `poll_output`.
    pub fn build_default<S: DataSource + 'static>(
        self,
        source: S,
    ) -> PipelineResult<(PipelineRuntime, PipelineHandles)> {
        let config = self.config;
        let mut runtime = PipelineRuntime::new(config.runtime.idle);

        let source_stage = SourceStage::new(source);
        let decimation =
            DecimationStage::new(config.decimation.mode, config.decimation.target_points);
        let visualization = VisualizationStage::new(
            config.visualization.display_points,
            config.visualization.visible_time_span_s,
        );

        let handles = PipelineHandles {
            source: source_stage.stats(),
            decimation: decimation.control(),
            visualization: visualization.control(),
        };
        if let Some(dir) = &config.visualization.debug_dump_dir {
            handles.visualization.request_debug_dump(dir);
        }

        runtime.add_stage(source_stage, config.ingest.queue.options())?;
        runtime.add_stage(decimation, config.decimation.queue.options())?;
        for (tap, options) in self.taps {
            runtime.add_boxed_stage(tap, options)?;
        }
        runtime.add_stage(visualization, config.visualization.queue.options())?;

        Ok((runtime, handles))
    }
}
