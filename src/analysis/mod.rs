//! Signal analysis for the display path
//!
//! This module provides:
//! - Decimation algorithms (None, MinMax, LTTB) over one channel slice
//! - Envelope verification of MinMax output against a known periodic signal

pub mod decimate;
pub mod envelope;

pub use decimate::{decimate, decimate_into, lttb, min_max, min_max_into, output_len};
pub use envelope::{EnvelopeReport, EnvelopeVerifier, DEFAULT_TOLERANCE_LSB};
