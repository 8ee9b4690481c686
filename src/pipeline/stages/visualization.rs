//! Windowing and display-budget re-decimation.
//!
//! The stage keeps a per-channel history of already decimated samples and on
//! every frame emits the most recent `visible_time_span * sample_rate`
//! samples, reduced with MinMax to the display budget when they exceed it.
//! MinMax emits point pairs, so an odd budget rounds down to the even count
//! below it and budgets under [`MIN_DISPLAY_POINTS`] are raised to it.
//!
//! # History
//!
//! - A change of sample rate clears every channel, since existing samples no
//!   longer share the new time density.
//! - History is trimmed to twice the window, so a shrinking window never
//!   discards data a growing one may still want right away.
//! - Channel 0's frame ends are tracked as absolute sample counts, purely for
//!   the debug dump.
//!
//! # Debug dump
//!
//! [`VisualizationControl::request_debug_dump`] arms a one-shot dump. The
//! next produced window writes `viz_debug_windowed_ch0.csv`
//! (`index,value,frame_boundary`) and `viz_debug_decimated_ch0.csv`
//! (`index,value`) into the requested directory.

use crate::analysis::decimate::min_max_into;
use crate::pipeline::frame::Frame;
use crate::pipeline::stage::{BatchView, BatchWriter, ExecContext, Stage, StageResult};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Default display budget, points per channel.
pub const DEFAULT_DISPLAY_POINTS: usize = 3840;

/// Smallest budget that fits one MinMax pair.
pub const MIN_DISPLAY_POINTS: usize = 2;

/// Default visible time span (10 ms).
pub const DEFAULT_VISIBLE_SPAN_S: f64 = 0.010;

pub const WINDOWED_DUMP_FILE: &str = "viz_debug_windowed_ch0.csv";
pub const DECIMATED_DUMP_FILE: &str = "viz_debug_decimated_ch0.csv";

#[derive(Debug)]
struct VisualizationShared {
    visible_span_bits: AtomicU64,
    display_points: AtomicUsize,
    coverage_bits: AtomicU64,
    window_samples: AtomicUsize,
    dump_request: Mutex<Option<PathBuf>>,
    last_dump: Mutex<Option<DebugDump>>,
}

/// Files written by the last debug dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugDump {
    pub windowed: PathBuf,
    pub decimated: PathBuf,
}

/// Handle for adjusting and observing a running [`VisualizationStage`].
#[derive(Debug, Clone)]
pub struct VisualizationControl {
    shared: Arc<VisualizationShared>,
}

impl VisualizationControl {
    fn new(display_points: usize, visible_span_s: f64) -> Self {
        Self {
            shared: Arc::new(VisualizationShared {
                visible_span_bits: AtomicU64::new(visible_span_s.to_bits()),
                display_points: AtomicUsize::new(display_points.max(MIN_DISPLAY_POINTS)),
                coverage_bits: AtomicU64::new(0f64.to_bits()),
                window_samples: AtomicUsize::new(0),
                dump_request: Mutex::new(None),
                last_dump: Mutex::new(None),
            }),
        }
    }

    pub fn set_visible_span_s(&self, seconds: f64) {
        self.shared
            .visible_span_bits
            .store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn visible_span_s(&self) -> f64 {
        f64::from_bits(self.shared.visible_span_bits.load(Ordering::Relaxed))
    }

    pub fn set_display_points(&self, points: usize) {
        self.shared
            .display_points
            .store(points.max(MIN_DISPLAY_POINTS), Ordering::Relaxed);
    }

    pub fn display_points(&self) -> usize {
        self.shared.display_points.load(Ordering::Relaxed)
    }

    /// Fraction of the visible window backed by history, in `[0, 1]`.
    pub fn coverage(&self) -> f64 {
        f64::from_bits(self.shared.coverage_bits.load(Ordering::Relaxed))
    }

    /// Window length in input samples for the most recent frame.
    pub fn window_samples(&self) -> usize {
        self.shared.window_samples.load(Ordering::Relaxed)
    }

    /// Dump the next produced window into `dir`.
    pub fn request_debug_dump(&self, dir: impl Into<PathBuf>) {
        *self
            .shared
            .dump_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(dir.into());
    }

    pub fn dump_pending(&self) -> bool {
        self.shared
            .dump_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Paths written by the most recent completed dump.
    pub fn last_dump(&self) -> Option<DebugDump> {
        self.shared
            .last_dump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_coverage(&self, coverage: f64) {
        self.shared
            .coverage_bits
            .store(coverage.to_bits(), Ordering::Relaxed);
    }

    fn take_dump_request(&self) -> Option<PathBuf> {
        self.shared
            .dump_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

pub struct VisualizationStage {
    control: VisualizationControl,
    history: Vec<VecDeque<i16>>,
    last_rate_hz: f64,
    ch0_total_appended: u64,
    ch0_frame_ends: VecDeque<u64>,
    window: Vec<i16>,
}

impl VisualizationStage {
    pub fn new(display_points: usize, visible_span_s: f64) -> Self {
        Self {
            control: VisualizationControl::new(display_points, visible_span_s),
            history: Vec::new(),
            last_rate_hz: 0.0,
            ch0_total_appended: 0,
            ch0_frame_ends: VecDeque::new(),
            window: Vec::new(),
        }
    }

    pub fn control(&self) -> VisualizationControl {
        self.control.clone()
    }

    fn clear_history(&mut self) {
        for h in &mut self.history {
            h.clear();
        }
        self.ch0_frame_ends.clear();
        self.ch0_total_appended = 0;
    }

    fn accumulate(&mut self, frame: &Frame) {
        let channels = frame.channel_count as usize;
        let spc = frame.samples_per_channel as u64;
        if channels == 0 || spc == 0 {
            return;
        }

        if frame.sample_rate_hz > 0.0 {
            if self.last_rate_hz > 0.0 && frame.sample_rate_hz != self.last_rate_hz {
                tracing::debug!(
                    "Visualization sample rate {} -> {} Hz, history cleared",
                    self.last_rate_hz,
                    frame.sample_rate_hz
                );
                self.clear_history();
            }
            self.last_rate_hz = frame.sample_rate_hz;
        }

        if self.history.len() != channels {
            self.history.resize_with(channels, VecDeque::new);
        }

        for (ch, history) in self.history.iter_mut().enumerate() {
            if let Some(samples) = frame.channel(ch) {
                history.extend(samples.iter().copied());
            }
        }

        self.ch0_total_appended += spc;
        self.ch0_frame_ends.push_back(self.ch0_total_appended);
    }

    /// Window and re-decimate the accumulated history. `None` while warming
    /// up (no rate yet, empty history, zero-length window).
    fn render(&mut self) -> Option<(Vec<i16>, u32)> {
        if self.last_rate_hz <= 0.0 || self.history.is_empty() {
            self.control.set_coverage(0.0);
            return None;
        }

        let span = self.control.visible_span_s();
        let window_samples = if span > 0.0 {
            (self.last_rate_hz * span) as usize
        } else {
            0
        };
        self.control
            .shared
            .window_samples
            .store(window_samples, Ordering::Relaxed);
        if window_samples == 0 {
            self.control.set_coverage(0.0);
            return None;
        }

        let max_history = window_samples.saturating_mul(2);
        for h in &mut self.history {
            if h.len() > max_history {
                let excess = h.len() - max_history;
                h.drain(..excess);
            }
        }
        let ch0_start = self.ch0_total_appended - self.history[0].len() as u64;
        while self.ch0_frame_ends.front().is_some_and(|&end| end <= ch0_start) {
            self.ch0_frame_ends.pop_front();
        }

        let min_available = self.history.iter().map(VecDeque::len).min().unwrap_or(0);
        if min_available == 0 {
            self.control.set_coverage(0.0);
            return None;
        }
        self.control
            .set_coverage((min_available as f64 / window_samples as f64).min(1.0));

        let take = min_available.min(window_samples);
        let budget = self.control.display_points().max(MIN_DISPLAY_POINTS);
        let dump_dir = self.control.take_dump_request();

        let mut out = Vec::with_capacity(self.history.len() * budget.min(take));
        let mut out_spc = 0;
        for (ch, history) in self.history.iter().enumerate() {
            self.window.clear();
            self.window.extend(history.range(history.len() - take..));

            let before = out.len();
            if take > budget {
                min_max_into(&self.window, budget / 2, &mut out);
            } else {
                out.extend_from_slice(&self.window);
            }

            if ch == 0 {
                out_spc = out.len() - before;
                if let Some(dir) = &dump_dir {
                    self.write_dump(dir, take, &out[before..]);
                }
            }
        }

        (out_spc > 0).then_some((out, out_spc as u32))
    }

    fn write_dump(&self, dir: &Path, take: usize, decimated: &[i16]) {
        let window_start = self.ch0_total_appended - take as u64;
        let boundaries: Vec<usize> = self
            .ch0_frame_ends
            .iter()
            .filter(|&&end| end > window_start && end < self.ch0_total_appended)
            .map(|&end| (end - window_start) as usize)
            .collect();

        match write_debug_csv(dir, &self.window, &boundaries, decimated) {
            Ok(dump) => {
                tracing::info!(
                    "Debug dump: {} ({} samples, {} boundaries), {} ({} samples)",
                    dump.windowed.display(),
                    self.window.len(),
                    boundaries.len(),
                    dump.decimated.display(),
                    decimated.len()
                );
                *self
                    .control
                    .shared
                    .last_dump
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(dump);
            }
            Err(e) => tracing::warn!("Debug dump to {} failed: {}", dir.display(), e),
        }
    }
}

fn write_debug_csv(
    dir: &Path,
    windowed: &[i16],
    boundaries: &[usize],
    decimated: &[i16],
) -> io::Result<DebugDump> {
    std::fs::create_dir_all(dir)?;

    let mut is_boundary = vec![false; windowed.len()];
    for &offset in boundaries {
        if let Some(slot) = is_boundary.get_mut(offset) {
            *slot = true;
        }
    }

    let windowed_path = dir.join(WINDOWED_DUMP_FILE);
    let mut w = BufWriter::new(File::create(&windowed_path)?);
    writeln!(w, "index,value,frame_boundary")?;
    for (i, (v, b)) in windowed.iter().zip(&is_boundary).enumerate() {
        writeln!(w, "{},{},{}", i, v, u8::from(*b))?;
    }
    w.flush()?;

    let decimated_path = dir.join(DECIMATED_DUMP_FILE);
    let mut w = BufWriter::new(File::create(&decimated_path)?);
    writeln!(w, "index,value")?;
    for (i, v) in decimated.iter().enumerate() {
        writeln!(w, "{},{}", i, v)?;
    }
    w.flush()?;

    Ok(DebugDump {
        windowed: windowed_path,
        decimated: decimated_path,
    })
}

impl Stage for VisualizationStage {
    fn name(&self) -> &str {
        "Visualization"
    }

    fn process(
        &mut self,
        input: &mut BatchView,
        output: &mut BatchWriter,
        _ctx: &ExecContext,
    ) -> StageResult {
        let Some(frame) = input.take() else {
            return StageResult::NoData;
        };
        self.accumulate(&frame);

        let Some((samples, spc)) = self.render() else {
            return StageResult::NoData;
        };
        let channels = self.history.len() as u32;
        let Ok(mut display) = Frame::from_samples(channels, spc, samples) else {
            return StageResult::NoData;
        };
        display.sequence = frame.sequence;
        display.producer_ts_ns = frame.producer_ts_ns;
        display.flags = frame.flags;
        display.sample_rate_hz = self.last_rate_hz;
        display.first_sample_index = frame.first_sample_index;

        output.push(display);
        StageResult::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(channels: u32, spc: u32, rate: f64, value: impl Fn(u32, u32) -> i16) -> Frame {
        let samples = (0..channels)
            .flat_map(|ch| (0..spc).map(move |i| (ch, i)))
            .map(|(ch, i)| value(ch, i))
            .collect();
        let mut f = Frame::from_samples(channels, spc, samples).unwrap();
        f.sample_rate_hz = rate;
        f
    }

    fn run(stage: &mut VisualizationStage, f: Frame) -> (StageResult, Option<Frame>) {
        let mut out = BatchWriter::new();
        let r = stage.process(
            &mut BatchView::new([f]),
            &mut out,
            &ExecContext::detached(0, 2),
        );
        (r, out.take().pop())
    }

    #[test]
    fn test_partial_window_coverage() {
        // 1000 Hz * 1 s = 1000-sample window.
        let mut stage = VisualizationStage::new(4000, 1.0);
        let control = stage.control();

        let (r, out) = run(&mut stage, frame(2, 250, 1000.0, |_, i| i as i16));
        assert_eq!(r, StageResult::Ok);
        let out = out.unwrap();
        assert_eq!(out.samples_per_channel, 250);
        assert_eq!(out.sample_rate_hz, 1000.0);
        assert!((control.coverage() - 0.25).abs() < 1e-12);
        assert_eq!(control.window_samples(), 1000);

        run(&mut stage, frame(2, 1000, 1000.0, |_, i| i as i16));
        assert_eq!(control.coverage(), 1.0);
    }

    #[test]
    fn test_reduces_to_display_budget() {
        let mut stage = VisualizationStage::new(100, 1.0);
        let (_, out) = run(&mut stage, frame(2, 1000, 1000.0, |ch, i| {
            if ch == 0 && i == 777 { 5000 } else { 0 }
        }));
        let out = out.unwrap();
        assert_eq!(out.samples_per_channel, 100);
        assert!(out.channel(0).unwrap().contains(&5000));
        assert!(out.channel(1).unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_output_never_exceeds_budget() {
        let mut stage = VisualizationStage::new(101, 1.0);
        let control = stage.control();
        let (_, out) = run(&mut stage, frame(1, 1000, 1000.0, |_, i| i as i16));
        assert_eq!(out.unwrap().samples_per_channel, 100);

        control.set_display_points(1);
        assert_eq!(control.display_points(), MIN_DISPLAY_POINTS);
        let (_, out) = run(&mut stage, frame(1, 1000, 1000.0, |_, i| i as i16));
        let out = out.unwrap();
        assert_eq!(out.samples_per_channel, 2);
        assert_eq!(out.channel(0).unwrap(), &[0, 999]);

        assert_eq!(VisualizationStage::new(0, 1.0).control().display_points(), 2);
    }

    #[test]
    fn test_window_takes_most_recent_samples() {
        // 100-sample window, budget large enough for passthrough.
        let mut stage = VisualizationStage::new(1000, 0.1);
        run(&mut stage, frame(1, 150, 1000.0, |_, _| 1));
        let (_, out) = run(&mut stage, frame(1, 60, 1000.0, |_, _| 2));
        let out = out.unwrap();
        assert_eq!(out.samples_per_channel, 100);
        let ch0 = out.channel(0).unwrap();
        assert!(ch0[..40].iter().all(|&v| v == 1));
        assert!(ch0[40..].iter().all(|&v| v == 2));
    }

    #[test]
    fn test_rate_change_clears_history() {
        let mut stage = VisualizationStage::new(10_000, 1.0);
        let control = stage.control();
        run(&mut stage, frame(1, 1000, 1000.0, |_, _| 1));
        assert_eq!(control.coverage(), 1.0);

        let (r, out) = run(&mut stage, frame(1, 500, 2000.0, |_, _| 7));
        assert_eq!(r, StageResult::Ok);
        let out = out.unwrap();
        assert_eq!(out.samples_per_channel, 500);
        assert!(out.samples().iter().all(|&v| v == 7));
        assert!((control.coverage() - 0.25).abs() < 1e-12);
        assert_eq!(out.sample_rate_hz, 2000.0);
    }

    #[test]
    fn test_zero_window_is_no_data() {
        let mut stage = VisualizationStage::new(100, 0.0);
        let (r, out) = run(&mut stage, frame(1, 10, 1000.0, |_, _| 0));
        assert_eq!(r, StageResult::NoData);
        assert!(out.is_none());
        assert_eq!(stage.control().coverage(), 0.0);
    }

    #[test]
    fn test_no_rate_is_no_data() {
        let mut stage = VisualizationStage::new(100, 1.0);
        let (r, _) = run(&mut stage, frame(1, 10, 0.0, |_, _| 0));
        assert_eq!(r, StageResult::NoData);
    }

    #[test]
    fn test_channel_count_change_resizes() {
        let mut stage = VisualizationStage::new(1000, 1.0);
        run(&mut stage, frame(1, 100, 1000.0, |_, _| 1));
        let (r, out) = run(&mut stage, frame(3, 100, 1000.0, |ch, _| ch as i16));
        assert_eq!(r, StageResult::Ok);
        let out = out.unwrap();
        assert_eq!(out.channel_count, 3);
        // New channels only have the latest frame, which bounds the window.
        assert_eq!(out.samples_per_channel, 100);
    }

    #[test]
    fn test_debug_dump_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut stage = VisualizationStage::new(8, 1.0);
        let control = stage.control();
        run(&mut stage, frame(1, 10, 100.0, |_, i| i as i16));

        control.request_debug_dump(dir.path());
        assert!(control.dump_pending());
        run(&mut stage, frame(1, 10, 100.0, |_, i| 10 + i as i16));
        assert!(!control.dump_pending());

        let dump = control.last_dump().unwrap();
        let windowed = std::fs::read_to_string(&dump.windowed).unwrap();
        let lines: Vec<&str> = windowed.lines().collect();
        assert_eq!(lines[0], "index,value,frame_boundary");
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[11], "10,10,1");
        assert_eq!(lines[5], "4,4,0");

        let decimated = std::fs::read_to_string(&dump.decimated).unwrap();
        assert_eq!(decimated.lines().count(), 9);
        assert!(decimated.starts_with("index,value\n0,0\n"));
    }
}
