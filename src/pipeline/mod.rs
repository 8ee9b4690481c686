//! Streaming frame pipeline.
//!
//! Frames flow through a linear chain of stages, each on its own worker
//! thread, connected by bounded queues with a configurable backpressure
//! policy. The last stage's output queue is polled by the caller.
//!
//! # Architecture
//!
//! ```text
//! DataSource ──► [Source] ══q0══► [Decimation] ══q1══► [Visualization] ══q2══► poll_output
//!                   │                   │                     │              poll_latest
//!                   └─ SourceStats      └─ DecimationControl  └─ VisualizationControl
//! ```
//!
//! # Design
//!
//! - **One thread per stage**: stage state is only touched by its worker, so
//!   stages need no locking.
//! - **Bounded queues**: `DropLatest` / `DropOldest` never block; `Block`
//!   waits on a condition variable released by dequeue or shutdown.
//! - **Borrowed frames stay local**: [`BatchWriter::push`] materialises
//!   anything borrowed before it can cross a queue.
//! - **Half-open failure**: a stage ending (EOS, error) only stops its own
//!   worker and is reported through [`RuntimeEvent`].

pub mod error;
pub mod executor;
pub mod frame;
pub mod queue;
pub mod stage;
pub mod stages;
pub mod telemetry;

pub use error::{PipelineError, PipelineResult};
pub use executor::{PipelineBuilder, PipelineHandles, PipelineRuntime, StageOptions};
pub use frame::{Frame, Ownership, ReleaseFn, FLAG_DISCONTINUITY};
pub use queue::{BoundedQueue, QueueError, QueueStats};
pub use stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
pub use stages::{
    DecimationControl, DecimationStage, SourceStage, SourceStats, VisualizationControl,
    VisualizationStage,
};
pub use telemetry::{ExitReason, RuntimeEvent, StageTelemetry, WorkerState};
