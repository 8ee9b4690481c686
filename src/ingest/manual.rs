//! Scripted source fed from a queue of prepared frames.

use crate::ingest::{DataSource, FrameBuffer, ReadError, SourceInfo};
use std::collections::VecDeque;

/// A [`DataSource`] replaying frames pushed into it.
///
/// Once the queue is empty it reports `EndOfStream` if it was built with
/// [`ManualSource::finite`], otherwise `NoData`.
#[derive(Debug, Clone)]
pub struct ManualSource {
    info: SourceInfo,
    frames: VecDeque<FrameBuffer>,
    finite: bool,
    started: bool,
    fail_with: Option<String>,
}

impl ManualSource {
    pub fn new(channel_count: u32, sample_rate_hz: f64) -> Self {
        Self {
            info: SourceInfo {
                channel_count,
                sample_rate_hz,
                is_realtime: false,
            },
            frames: VecDeque::new(),
            finite: false,
            started: false,
            fail_with: None,
        }
    }

    /// Source that ends after replaying `frames`.
    pub fn finite(
        channel_count: u32,
        sample_rate_hz: f64,
        frames: impl IntoIterator<Item = FrameBuffer>,
    ) -> Self {
        let mut source = Self::new(channel_count, sample_rate_hz);
        source.frames.extend(frames);
        source.finite = true;
        source
    }

    pub fn push(&mut self, frame: FrameBuffer) {
        self.frames.push_back(frame);
    }

    /// Report an error once the queued frames are exhausted.
    pub fn fail_after_queue(&mut self, message: impl Into<String>) {
        self.fail_with = Some(message.into());
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl DataSource for ManualSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn start(&mut self) -> crate::error::Result<()> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn read_frame(&mut self) -> Result<FrameBuffer, ReadError> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(frame);
        }
        if let Some(message) = &self.fail_with {
            return Err(ReadError::Error(message.clone()));
        }
        if self.finite {
            Err(ReadError::EndOfStream)
        } else {
            Err(ReadError::NoData)
        }
    }
}
