//! Dedicated thread moving frames from a [`DataSource`] into channel rings.
//!
//! One thread per ring set keeps the single-producer rule structural: the
//! [`RingFeeder`] is moved into the thread and never shared.

use crate::ingest::{DataSource, ReadError, RingFeeder, SequenceTracker};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Counters published by the ingestion thread.
#[derive(Debug, Default)]
pub struct IngestionStats {
    frames: AtomicU64,
    sequence_gaps: AtomicU64,
    samples_pushed: AtomicU64,
    last_producer_ts_ns: AtomicU64,
    finished: AtomicBool,
}

impl IngestionStats {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn sequence_gaps(&self) -> u64 {
        self.sequence_gaps.load(Ordering::Relaxed)
    }

    pub fn samples_pushed(&self) -> u64 {
        self.samples_pushed.load(Ordering::Relaxed)
    }

    pub fn last_producer_ts_ns(&self) -> u64 {
        self.last_producer_ts_ns.load(Ordering::Relaxed)
    }

    /// Whether the thread has exited (end of stream, error or stop).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

pub struct IngestionThread {
    running: Arc<AtomicBool>,
    stats: Arc<IngestionStats>,
    handle: Option<JoinHandle<()>>,
}

impl IngestionThread {
    /// Start pulling from `source` into `feeder` on a new thread.
    pub fn spawn<S>(mut source: S, mut feeder: RingFeeder) -> std::io::Result<Self>
    where
        S: DataSource + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(IngestionStats::default());

        let handle = {
            let running = running.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name("ingestion".to_string())
                .spawn(move || {
                    if let Err(e) = source.start() {
                        tracing::error!("Ingestion source failed to start: {}", e);
                    } else {
                        feeder.set_sample_rate(source.info().sample_rate_hz);
                        ingest_loop(&mut source, &mut feeder, &running, &stats);
                        source.stop();
                    }
                    feeder.close();
                    stats.finished.store(true, Ordering::Release);
                })?
        };

        Ok(Self {
            running,
            stats,
            handle: Some(handle),
        })
    }

    pub fn stats(&self) -> Arc<IngestionStats> {
        self.stats.clone()
    }

    /// Ask the thread to exit and wait for it. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Ingestion thread panicked");
            }
        }
    }
}

impl Drop for IngestionThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest_loop<S: DataSource>(
    source: &mut S,
    feeder: &mut RingFeeder,
    running: &AtomicBool,
    stats: &IngestionStats,
) {
    let mut tracker = SequenceTracker::new();

    while running.load(Ordering::Relaxed) {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(ReadError::NoData) => {
                std::thread::yield_now();
                continue;
            }
            Err(ReadError::EndOfStream) => {
                tracing::info!("Ingestion source ended");
                return;
            }
            Err(ReadError::Error(e)) => {
                tracing::error!("Ingestion source error: {}", e);
                return;
            }
        };

        let gap = tracker.observe(frame.sequence);
        if gap > 0 {
            tracing::debug!("Ingestion sequence gap of {} before {}", gap, frame.sequence);
            stats.sequence_gaps.store(tracker.total_gaps(), Ordering::Relaxed);
        }
        stats
            .last_producer_ts_ns
            .store(frame.producer_ts_ns, Ordering::Relaxed);

        let pushed = feeder.feed(&frame);
        stats.samples_pushed.fetch_add(pushed as u64, Ordering::Relaxed);
        stats.frames.fetch_add(1, Ordering::Relaxed);

        while running.load(Ordering::Relaxed) && feeder.throttle() {}
    }
}
