//! Built-in stages.
//!
//! ```text
//! [SourceStage<S>] ──► [DecimationStage] ──► [VisualizationStage] ──► poll_output
//! ```
//!
//! Each stage exposes a cloneable control or stats handle so it can be tuned
//! and observed after it has moved into its worker thread.

pub mod decimation;
pub mod envelope_check;
pub mod source;
pub mod visualization;

pub use decimation::{DecimationControl, DecimationStage, DEFAULT_TARGET_POINTS};
pub use envelope_check::{EnvelopeCheckStage, EnvelopeCheckStats};
pub use source::{SourceStage, SourceStats};
pub use visualization::{
    DebugDump, VisualizationControl, VisualizationStage, DEFAULT_DISPLAY_POINTS,
    DEFAULT_VISIBLE_SPAN_S, MIN_DISPLAY_POINTS,
};
