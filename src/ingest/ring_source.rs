//! Per-channel ring buffers bridging a producer thread to the pipeline.

use crate::ingest::ring_buffer::{RingBuffer, RingConsumer, RingProducer};
use crate::ingest::{DataSource, FrameBuffer, ReadError, SourceInfo};
use crate::types::LTTB_HIGH_RATE_THRESHOLD_HZ;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fill ratio above which a producer backs off.
pub const THROTTLE_FILL_RATIO: f64 = 0.9;

const THROTTLE_SLEEP: Duration = Duration::from_micros(100);

/// Pushed/dropped sample accounting for one ring.
#[derive(Debug, Default)]
pub struct DropCounter {
    total_pushed: AtomicU64,
    total_dropped: AtomicU64,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_push(&self, attempted: u64, pushed: u64) {
        self.total_pushed.fetch_add(pushed, Ordering::Relaxed);
        if pushed < attempted {
            self.total_dropped
                .fetch_add(attempted - pushed, Ordering::Relaxed);
        }
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.total_pushed.store(0, Ordering::Relaxed);
        self.total_dropped.store(0, Ordering::Relaxed);
    }
}

/// Create `channel_count` rings of `capacity` samples and return both ends.
pub fn ring_link(
    channel_count: u32,
    capacity: usize,
    block_length: u32,
    sample_rate_hz: f64,
) -> (RingFeeder, RingSource) {
    let (producers, consumers): (Vec<_>, Vec<_>) = (0..channel_count.max(1))
        .map(|_| RingBuffer::<i16>::new(capacity))
        .unzip();
    (
        RingFeeder::new(producers, sample_rate_hz),
        RingSource::new(consumers, block_length, sample_rate_hz),
    )
}

/// Producer end: splits channel-major frames into per-channel rings.
pub struct RingFeeder {
    rings: Vec<RingProducer<i16>>,
    counters: Vec<Arc<DropCounter>>,
    sample_rate_hz: f64,
}

impl RingFeeder {
    pub fn new(rings: Vec<RingProducer<i16>>, sample_rate_hz: f64) -> Self {
        let counters = rings.iter().map(|_| Arc::new(DropCounter::new())).collect();
        Self {
            rings,
            counters,
            sample_rate_hz,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.rings.len()
    }

    pub fn drop_counters(&self) -> &[Arc<DropCounter>] {
        &self.counters
    }

    pub fn total_dropped(&self) -> u64 {
        self.counters.iter().map(|c| c.total_dropped()).sum()
    }

    pub fn set_sample_rate(&mut self, sample_rate_hz: f64) {
        self.sample_rate_hz = sample_rate_hz;
    }

    /// Push every channel of `frame` that has a ring. Samples that do not fit
    /// are recorded as dropped. Returns the total number pushed.
    pub fn feed(&mut self, frame: &FrameBuffer) -> usize {
        let spc = frame.samples_per_channel as u64;
        let mut pushed_total = 0;
        for (ch, (ring, counter)) in self.rings.iter_mut().zip(&self.counters).enumerate() {
            let Some(samples) = frame.channel(ch) else {
                break;
            };
            let pushed = ring.push_bulk(samples);
            counter.record_push(spc, pushed as u64);
            if (pushed as u64) < spc {
                tracing::trace!(
                    "Ring {} full: dropped {} of {} samples (seq {})",
                    ch,
                    spc - pushed as u64,
                    spc,
                    frame.sequence
                );
            }
            pushed_total += pushed;
        }
        pushed_total
    }

    /// Highest fill ratio across the rings.
    pub fn fill_ratio(&self) -> f64 {
        self.rings
            .iter()
            .map(|r| r.fill_ratio())
            .fold(0.0, f64::max)
    }

    /// Back off when the consumer lags, unless running in the high-rate
    /// regime where dropping is preferred over stalling the producer.
    pub fn should_throttle(&self) -> bool {
        self.sample_rate_hz < LTTB_HIGH_RATE_THRESHOLD_HZ
            && self.fill_ratio() > THROTTLE_FILL_RATIO
    }

    /// Sleep briefly if [`RingFeeder::should_throttle`]. Returns whether it did.
    pub fn throttle(&self) -> bool {
        if self.should_throttle() {
            std::thread::sleep(THROTTLE_SLEEP);
            true
        } else {
            false
        }
    }

    /// Signal end of stream to the consumer side.
    pub fn close(&mut self) {
        for ring in &mut self.rings {
            ring.close();
        }
    }
}

/// Consumer end: a [`DataSource`] reading aligned fixed-length blocks from
/// every channel ring.
pub struct RingSource {
    rings: Vec<RingConsumer<i16>>,
    block_length: u32,
    sample_rate_hz: f64,
    next_sequence: u64,
    epoch: Instant,
}

impl RingSource {
    pub fn new(rings: Vec<RingConsumer<i16>>, block_length: u32, sample_rate_hz: f64) -> Self {
        Self {
            rings,
            block_length: block_length.max(1),
            sample_rate_hz,
            next_sequence: 0,
            epoch: Instant::now(),
        }
    }

    fn available(&self) -> usize {
        self.rings.iter().map(|r| r.len()).min().unwrap_or(0)
    }

    fn producer_closed(&self) -> bool {
        self.rings.iter().all(|r| r.ring().is_closed())
    }
}

impl DataSource for RingSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            channel_count: self.rings.len() as u32,
            sample_rate_hz: self.sample_rate_hz,
            is_realtime: true,
        }
    }

    fn start(&mut self) -> crate::error::Result<()> {
        self.epoch = Instant::now();
        Ok(())
    }

    fn read_frame(&mut self) -> Result<FrameBuffer, ReadError> {
        let block = self.block_length as usize;
        // Closed first: once it reads true, every push is already visible.
        let closed = self.producer_closed();
        let available = self.available();
        let take = if available >= block {
            block
        } else if closed {
            // Flush the tail once the producer is gone.
            if available == 0 {
                return Err(ReadError::EndOfStream);
            }
            available
        } else {
            return Err(ReadError::NoData);
        };

        let mut samples = vec![0i16; take * self.rings.len()];
        for (ring, dst) in self.rings.iter_mut().zip(samples.chunks_exact_mut(take)) {
            let popped = ring.pop_bulk(dst);
            if popped != take {
                return Err(ReadError::Error(format!(
                    "ring underrun: expected {take} samples, popped {popped}"
                )));
            }
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(FrameBuffer {
            sequence,
            producer_ts_ns: self.epoch.elapsed().as_nanos() as u64,
            channel_count: self.rings.len() as u32,
            samples_per_channel: take as u32,
            samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, channels: u32, spc: u32, base: i16) -> FrameBuffer {
        FrameBuffer {
            sequence: seq,
            producer_ts_ns: 0,
            channel_count: channels,
            samples_per_channel: spc,
            samples: (0..(channels * spc) as i16).map(|i| base + i).collect(),
        }
    }

    #[test]
    fn test_drop_counter() {
        let c = DropCounter::new();
        c.record_push(10, 10);
        c.record_push(10, 4);
        assert_eq!(c.total_pushed(), 14);
        assert_eq!(c.total_dropped(), 6);
        c.reset();
        assert_eq!(c.total_dropped(), 0);
    }

    #[test]
    fn test_feed_then_read_keeps_channel_layout() {
        let (mut feeder, mut source) = ring_link(2, 64, 4, 1000.0);
        feeder.feed(&frame(0, 2, 4, 0));

        let out = source.read_frame().unwrap();
        assert_eq!(out.channel_count, 2);
        assert_eq!(out.samples_per_channel, 4);
        assert_eq!(out.channel(0).unwrap(), &[0, 1, 2, 3]);
        assert_eq!(out.channel(1).unwrap(), &[4, 5, 6, 7]);
        assert_eq!(source.read_frame(), Err(ReadError::NoData));
    }

    #[test]
    fn test_overflow_counted_as_drops() {
        let (mut feeder, _source) = ring_link(1, 6, 4, 1000.0);
        assert_eq!(feeder.feed(&frame(0, 1, 4, 0)), 4);
        assert_eq!(feeder.feed(&frame(1, 1, 4, 0)), 2);
        assert_eq!(feeder.total_dropped(), 2);
        assert_eq!(feeder.drop_counters()[0].total_pushed(), 6);
    }

    #[test]
    fn test_throttle_decision() {
        let (mut feeder, _source) = ring_link(1, 10, 4, 1000.0);
        feeder.feed(&frame(0, 1, 10, 0));
        assert!(feeder.should_throttle());

        feeder.set_sample_rate(LTTB_HIGH_RATE_THRESHOLD_HZ);
        assert!(!feeder.should_throttle());
        assert!(!feeder.throttle());
    }

    #[test]
    fn test_close_flushes_tail_then_ends() {
        let (mut feeder, mut source) = ring_link(1, 64, 8, 1000.0);
        feeder.feed(&frame(0, 1, 5, 0));
        assert_eq!(source.read_frame(), Err(ReadError::NoData));
        feeder.close();

        let tail = source.read_frame().unwrap();
        assert_eq!(tail.samples_per_channel, 5);
        assert_eq!(source.read_frame(), Err(ReadError::EndOfStream));
    }

    #[test]
    fn test_sequences_increment() {
        let (mut feeder, mut source) = ring_link(1, 64, 2, 1000.0);
        feeder.feed(&frame(0, 1, 6, 0));
        let seqs: Vec<u64> = (0..3).map(|_| source.read_frame().unwrap().sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
