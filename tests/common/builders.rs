//! Test data builders for frames and frame buffers

use scope_pipeline::ingest::FrameBuffer;
use scope_pipeline::Frame;

/// Builder for owned test Frames
pub struct FrameBuilder {
    channel_count: u32,
    samples_per_channel: u32,
    sample_rate_hz: f64,
    sequence: u64,
    first_sample_index: u64,
    samples: Option<Vec<i16>>,
}

impl FrameBuilder {
    pub fn new(channel_count: u32, samples_per_channel: u32) -> Self {
        Self {
            channel_count,
            samples_per_channel,
            sample_rate_hz: 1_000_000.0,
            sequence: 0,
            first_sample_index: 0,
            samples: None,
        }
    }

    pub fn sample_rate(mut self, hz: f64) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    pub fn sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn first_sample_index(mut self, index: u64) -> Self {
        self.first_sample_index = index;
        self
    }

    /// Channel-major samples; defaults to a per-channel ramp.
    pub fn samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn build(self) -> Frame {
        let spc = self.samples_per_channel;
        let samples = self.samples.unwrap_or_else(|| {
            (0..self.channel_count)
                .flat_map(|ch| (0..spc).map(move |i| (ch * 1000 + i) as i16))
                .collect()
        });
        let mut frame = Frame::from_samples(self.channel_count, spc, samples)
            .expect("sample count must match the frame shape");
        frame.sample_rate_hz = self.sample_rate_hz;
        frame.sequence = self.sequence;
        frame.first_sample_index = self.first_sample_index;
        frame
    }

    pub fn build_buffer(self) -> FrameBuffer {
        self.build().to_frame_buffer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(2, 4).sequence(7).sample_rate(48_000.0).build();

        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.sample_rate_hz, 48_000.0);
        assert_eq!(frame.channel(1).unwrap(), &[1000, 1001, 1002, 1003]);
    }
}
