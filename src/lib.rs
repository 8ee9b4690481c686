//! # scope-pipeline: streaming frame processing runtime
//!
//! A multi-channel sample stream is cut into frames, reduced by a decimation
//! stage and windowed into display-sized frames by a visualization stage.
//! Every stage runs on its own worker thread; stages are linked by bounded
//! queues whose backpressure policy decides what happens when a consumer
//! falls behind.
//!
//! ## Architecture
//!
//! - **Ingest**: [`DataSource`](ingest::DataSource) implementations, SPSC
//!   per-channel rings and the wire frame format
//! - **Pipeline**: frames, queues, the stage contract and the runtime
//! - **Analysis**: decimation algorithms and the envelope verifier
//! - **Config**: TOML/JSON pipeline configuration
//!
//! ## Example
//!
//! ```ignore
//! use scope_pipeline::{
//!     config::PipelineConfig,
//!     ingest::ring_link,
//!     pipeline::PipelineBuilder,
//! };
//!
//! let config = PipelineConfig::default();
//! let (feeder, source) = ring_link(2, 1 << 20, 8192, 1e6);
//! let (mut runtime, handles) = PipelineBuilder::new(config).build_default(source)?;
//! runtime.start()?;
//!
//! // Producer thread calls feeder.feed(&buffer) ...
//!
//! while let Some(frame) = runtime.poll_latest() {
//!     render(&frame);
//! }
//! runtime.stop();
//! ```

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Result, ResultExt, ScopeError};
pub use pipeline::{Frame, PipelineBuilder, PipelineRuntime, Stage, StageResult};
pub use types::{BackpressurePolicy, DecimationMode, IdleStrategy};
