//! scope-pipeline demo
//!
//! Feeds a synthetic periodic tone through the ring buffers and the default
//! Source → Decimation → EnvelopeCheck → Visualization pipeline for a short
//! run, then logs per-stage telemetry and the envelope match rate.
//!
//! Usage: `scope-pipeline [config-path]`

use anyhow::Context;
use scope_pipeline::{
    config::PipelineConfig,
    ingest::{ring_link, DataSource, FrameBuffer, IngestionThread, ReadError, SourceInfo},
    pipeline::{stages::EnvelopeCheckStage, PipelineBuilder, RuntimeEvent},
};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Real-time paced sine generator, one phase-shifted copy per channel.
struct ToneSource {
    period: Vec<i16>,
    channel_count: u32,
    block_samples: usize,
    sample_rate_hz: f64,
    sequence: u64,
    position: usize,
    started: Option<Instant>,
}

impl ToneSource {
    fn new(period: Vec<i16>, channel_count: u32, block_samples: usize, rate: f64) -> Self {
        Self {
            period,
            channel_count,
            block_samples,
            sample_rate_hz: rate,
            sequence: 0,
            position: 0,
            started: None,
        }
    }
}

impl DataSource for ToneSource {
    fn info(&self) -> SourceInfo {
        SourceInfo {
            channel_count: self.channel_count,
            sample_rate_hz: self.sample_rate_hz,
            is_realtime: true,
        }
    }

    fn start(&mut self) -> scope_pipeline::Result<()> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started = None;
    }

    fn read_frame(&mut self) -> Result<FrameBuffer, ReadError> {
        let Some(started) = self.started else {
            return Err(ReadError::NoData);
        };
        let due = started.elapsed().as_secs_f64() * self.sample_rate_hz;
        if ((self.position + self.block_samples) as f64) > due {
            std::thread::sleep(Duration::from_micros(200));
            return Err(ReadError::NoData);
        }

        let len = self.period.len();
        let channels = self.channel_count as usize;
        let mut samples = Vec::with_capacity(channels * self.block_samples);
        for ch in 0..channels {
            let phase = ch * len / channels;
            samples.extend(
                (0..self.block_samples).map(|i| self.period[(self.position + i + phase) % len]),
            );
        }

        let frame = FrameBuffer {
            sequence: self.sequence,
            producer_ts_ns: started.elapsed().as_nanos() as u64,
            channel_count: self.channel_count,
            samples_per_channel: self.block_samples as u32,
            samples,
        };
        self.sequence += 1;
        self.position += self.block_samples;
        Ok(frame)
    }
}

fn tone_period(samples: usize, amplitude: i16) -> Vec<i16> {
    let n = samples.max(2);
    (0..n)
        .map(|i| {
            let phase = i as f64 / n as f64 * std::f64::consts::TAU;
            (phase.sin() * amplitude as f64).round() as i16
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => PipelineConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.runtime.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting scope-pipeline demo");
    if let Some(path) = &config_path {
        tracing::info!("Loaded config from {}", path);
    }
    config.validate().context("Invalid configuration")?;

    let ingest = &config.ingest;
    let period = tone_period(config.demo.period_samples, config.demo.amplitude);
    let (feeder, ring_source) = ring_link(
        ingest.channel_count,
        ingest.ring_capacity,
        ingest.block_samples as u32,
        ingest.sample_rate_hz,
    );
    let drop_counters = feeder.drop_counters().to_vec();

    let check = EnvelopeCheckStage::new(
        &period,
        ingest.block_samples,
        config.decimation.target_points,
    );
    let envelope = check.stats();

    let (mut runtime, handles) = PipelineBuilder::new(config.clone())
        .with_tap(check, config.decimation.queue.options())
        .build_default(ring_source)?;
    let events = runtime.events();
    runtime.start()?;

    let tone = ToneSource::new(
        period,
        ingest.channel_count,
        ingest.block_samples,
        ingest.sample_rate_hz,
    );
    let mut ingestion = IngestionThread::spawn(tone, feeder)?;

    let deadline = Instant::now() + Duration::from_secs_f64(config.demo.duration_s.max(0.0));
    let mut display_frames = 0u64;
    let mut last_report = Instant::now();
    while Instant::now() < deadline {
        if let Some(frame) = runtime.poll_latest() {
            display_frames += 1;
            if last_report.elapsed() >= Duration::from_millis(500) {
                tracing::debug!(
                    "Display frame #{}: {} ch x {} points, coverage {:.2}, mode {}",
                    frame.sequence,
                    frame.channel_count,
                    frame.samples_per_channel,
                    handles.visualization.coverage(),
                    handles.decimation.effective_mode()
                );
                last_report = Instant::now();
            }
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    ingestion.stop();
    runtime.stop();

    for event in events.try_iter() {
        let RuntimeEvent::WorkerExited {
            stage_index,
            name,
            reason,
        } = event;
        tracing::info!("Stage {} ({}) exited: {}", stage_index, name, reason);
    }
    for stage in runtime.telemetry() {
        tracing::info!("Telemetry: {}", serde_json::to_string(&stage)?);
    }

    let ring_drops: u64 = drop_counters.iter().map(|c| c.total_dropped()).sum();
    tracing::info!(
        "Source: {} frames, {} sequence gaps, {} ring drops; {} display frames polled",
        handles.source.frames(),
        handles.source.sequence_gaps(),
        ring_drops,
        display_frames
    );
    tracing::info!(
        "Envelope check: {} frames checked, {} skipped, match rate {:.4}",
        envelope.frames_checked(),
        envelope.frames_skipped(),
        envelope.match_rate()
    );

    Ok(())
}
