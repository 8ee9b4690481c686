//! Frame: the unit of data flow through the pipeline.
//!
//! A frame is one block of channel-major `i16` samples plus metadata. Channel
//! 0's samples are contiguous, then channel 1's, and so on, for a total of
//! `channel_count * samples_per_channel` elements.
//!
//! # Ownership
//!
//! The sample storage is either **owned** (a `Vec<i16>`) or **borrowed** (a
//! read-only view into memory owned by someone else, e.g. a shared-memory
//! region, plus a release callback). The callback lives in an `Option` that is
//! taken on drop, so it runs exactly once. `Frame` does not implement `Clone`;
//! duplicating one requires [`Frame::to_owned_frame`], which always produces
//! an owned deep copy.
//!
//! Borrowed samples can be read but never written. [`Frame::samples_mut`]
//! returns [`PipelineError::BorrowedMutation`] until the frame has been
//! materialized with [`Frame::make_owned`].

use crate::ingest::FrameBuffer;
use crate::pipeline::error::{PipelineError, PipelineResult};
use std::fmt;
use std::ptr::NonNull;

/// Flag bit set on a frame that follows a gap in the source sequence.
pub const FLAG_DISCONTINUITY: u32 = 1 << 0;

/// Callback returning borrowed memory to its owner.
pub type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Which storage variant a frame currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Owned,
    Borrowed,
}

/// Read-only view into external memory with a one-shot release callback.
struct BorrowedSamples {
    ptr: NonNull<i16>,
    len: usize,
    release: Option<ReleaseFn>,
}

// SAFETY: the region is never written through this view, and
// `Frame::from_borrowed` requires the owner to keep it valid and unmodified
// from any thread until the release callback runs.
unsafe impl Send for BorrowedSamples {}

impl BorrowedSamples {
    fn as_slice(&self) -> &[i16] {
        // SAFETY: upheld by the contract of `Frame::from_borrowed`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for BorrowedSamples {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

enum FrameData {
    Owned(Vec<i16>),
    Borrowed(BorrowedSamples),
}

/// One block of samples for all channels at one instant.
pub struct Frame {
    /// Monotonic per source
    pub sequence: u64,
    /// Capture timestamp
    pub producer_ts_ns: u64,
    pub channel_count: u32,
    pub samples_per_channel: u32,
    pub sample_rate_hz: f64,
    /// Absolute position of the first sample in the source's stream
    pub first_sample_index: u64,
    /// See [`FLAG_DISCONTINUITY`]
    pub flags: u32,
    data: FrameData,
}

impl Frame {
    /// Zero-filled owned frame.
    pub fn new(channel_count: u32, samples_per_channel: u32) -> Self {
        let len = channel_count as usize * samples_per_channel as usize;
        Self::with_data(channel_count, samples_per_channel, FrameData::Owned(vec![0; len]))
    }

    /// Owned frame over `samples`, which must hold exactly
    /// `channel_count * samples_per_channel` values.
    pub fn from_samples(
        channel_count: u32,
        samples_per_channel: u32,
        samples: Vec<i16>,
    ) -> PipelineResult<Self> {
        let expected = channel_count as usize * samples_per_channel as usize;
        if samples.len() != expected {
            return Err(PipelineError::LayoutMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self::with_data(
            channel_count,
            samples_per_channel,
            FrameData::Owned(samples),
        ))
    }

    /// Borrowed frame over `channel_count * samples_per_channel` samples at `ptr`.
    ///
    /// `release` runs exactly once, when the frame is dropped, overwritten or
    /// materialized into an owned copy.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `channel_count * samples_per_channel`
    /// initialized `i16` values that stay valid, and are not written by
    /// anyone, until `release` has been called. The frame may be moved to and
    /// dropped on another thread.
    pub unsafe fn from_borrowed(
        channel_count: u32,
        samples_per_channel: u32,
        ptr: NonNull<i16>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        let len = channel_count as usize * samples_per_channel as usize;
        Self::with_data(
            channel_count,
            samples_per_channel,
            FrameData::Borrowed(BorrowedSamples {
                ptr,
                len,
                release: Some(Box::new(release)),
            }),
        )
    }

    /// Adapt an ingestion buffer into an owned frame.
    pub fn from_frame_buffer(
        buffer: FrameBuffer,
        sample_rate_hz: f64,
        first_sample_index: u64,
    ) -> PipelineResult<Self> {
        let mut frame = Self::from_samples(
            buffer.channel_count,
            buffer.samples_per_channel,
            buffer.samples,
        )?;
        frame.sequence = buffer.sequence;
        frame.producer_ts_ns = buffer.producer_ts_ns;
        frame.sample_rate_hz = sample_rate_hz;
        frame.first_sample_index = first_sample_index;
        Ok(frame)
    }

    fn with_data(channel_count: u32, samples_per_channel: u32, data: FrameData) -> Self {
        Self {
            sequence: 0,
            producer_ts_ns: 0,
            channel_count,
            samples_per_channel,
            sample_rate_hz: 0.0,
            first_sample_index: 0,
            flags: 0,
            data,
        }
    }

    pub fn ownership(&self) -> Ownership {
        match self.data {
            FrameData::Owned(_) => Ownership::Owned,
            FrameData::Borrowed(_) => Ownership::Borrowed,
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, FrameData::Borrowed(_))
    }

    /// All samples, channel-major.
    pub fn samples(&self) -> &[i16] {
        match &self.data {
            FrameData::Owned(v) => v,
            FrameData::Borrowed(b) => b.as_slice(),
        }
    }

    /// Mutable samples; fails for borrowed frames.
    pub fn samples_mut(&mut self) -> PipelineResult<&mut [i16]> {
        match &mut self.data {
            FrameData::Owned(v) => Ok(v),
            FrameData::Borrowed(_) => Err(PipelineError::BorrowedMutation),
        }
    }

    /// Samples of one channel, or `None` if `ch` is out of range.
    pub fn channel(&self, ch: usize) -> Option<&[i16]> {
        if ch >= self.channel_count as usize {
            return None;
        }
        let spc = self.samples_per_channel as usize;
        self.samples().get(ch * spc..(ch + 1) * spc)
    }

    pub fn len(&self) -> usize {
        self.samples().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time covered by one channel of this frame, in seconds.
    pub fn duration_s(&self) -> f64 {
        if self.sample_rate_hz > 0.0 {
            self.samples_per_channel as f64 / self.sample_rate_hz
        } else {
            0.0
        }
    }

    /// Copy borrowed samples into an owned buffer and release the borrow.
    /// No-op for owned frames.
    pub fn make_owned(&mut self) {
        if let FrameData::Borrowed(b) = &self.data {
            let copy = b.as_slice().to_vec();
            // Dropping the old variant runs the release callback.
            self.data = FrameData::Owned(copy);
        }
    }

    /// Consuming form of [`Frame::make_owned`].
    pub fn into_owned(mut self) -> Self {
        self.make_owned();
        self
    }

    /// Owned deep copy with identical metadata. The original is untouched.
    pub fn to_owned_frame(&self) -> Self {
        Self {
            sequence: self.sequence,
            producer_ts_ns: self.producer_ts_ns,
            channel_count: self.channel_count,
            samples_per_channel: self.samples_per_channel,
            sample_rate_hz: self.sample_rate_hz,
            first_sample_index: self.first_sample_index,
            flags: self.flags,
            data: FrameData::Owned(self.samples().to_vec()),
        }
    }

    /// Copy into the ingestion-side representation.
    pub fn to_frame_buffer(&self) -> FrameBuffer {
        FrameBuffer {
            sequence: self.sequence,
            producer_ts_ns: self.producer_ts_ns,
            channel_count: self.channel_count,
            samples_per_channel: self.samples_per_channel,
            samples: self.samples().to_vec(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("producer_ts_ns", &self.producer_ts_ns)
            .field("channel_count", &self.channel_count)
            .field("samples_per_channel", &self.samples_per_channel)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("first_sample_index", &self.first_sample_index)
            .field("flags", &self.flags)
            .field("ownership", &self.ownership())
            .finish()
    }
}
