//! Decimation algorithms.
//!
//! All functions are pure: the output depends only on the samples, the mode
//! and the target.
//!
//! # Modes
//!
//! - **None**: passthrough.
//! - **MinMax**: `target_points` equal-width buckets (sizes differ by at most
//!   one), each emitting `min` then `max`. Output length is
//!   `2 * target_points`. No spike is ever skipped.
//! - **LTTB**: `target_points` output samples. First and last are always
//!   kept; every inner bucket contributes the sample forming the largest
//!   triangle with the previously chosen point and the next bucket's average.
//!
//! Rate-dependent mode fallback lives on [`DecimationMode::effective`].

use crate::types::DecimationMode;
use std::ops::Range;

/// Index range of MinMax bucket `bucket` out of `buckets` over `n` samples.
///
/// `start = floor(b * n / buckets)`, `end = floor((b + 1) * n / buckets)`.
/// Ranges for `0..buckets` tile `0..n` exactly.
pub fn bucket_range(bucket: usize, n: usize, buckets: usize) -> Range<usize> {
    if buckets == 0 {
        return 0..0;
    }
    let start = (bucket as u128 * n as u128 / buckets as u128) as usize;
    let end = ((bucket as u128 + 1) * n as u128 / buckets as u128) as usize;
    start..end
}

/// Decimate `samples` with `mode`.
pub fn decimate(samples: &[i16], mode: DecimationMode, target_points: usize) -> Vec<i16> {
    let mut out = Vec::new();
    decimate_into(samples, mode, target_points, &mut out);
    out
}

/// Like [`decimate`], appending to `out` instead of allocating.
pub fn decimate_into(
    samples: &[i16],
    mode: DecimationMode,
    target_points: usize,
    out: &mut Vec<i16>,
) {
    match mode {
        DecimationMode::None => out.extend_from_slice(samples),
        DecimationMode::MinMax => min_max_into(samples, target_points, out),
        DecimationMode::Lttb => lttb_into(samples, target_points, out),
    }
}

/// Number of output samples `decimate` produces for `n` input samples.
pub fn output_len(n: usize, mode: DecimationMode, target_points: usize) -> usize {
    match mode {
        DecimationMode::None => n,
        DecimationMode::MinMax => {
            if target_points == 0 {
                0
            } else if n < target_points {
                n
            } else {
                2 * target_points
            }
        }
        DecimationMode::Lttb => {
            if n <= target_points {
                n
            } else {
                target_points
            }
        }
    }
}

pub fn min_max(samples: &[i16], buckets: usize) -> Vec<i16> {
    let mut out = Vec::new();
    min_max_into(samples, buckets, &mut out);
    out
}

/// MinMax over `buckets` buckets. Inputs shorter than `buckets` are copied
/// unchanged since every bucket would be empty or a single sample.
pub fn min_max_into(samples: &[i16], buckets: usize, out: &mut Vec<i16>) {
    let n = samples.len();
    if buckets == 0 {
        return;
    }
    if n < buckets {
        out.extend_from_slice(samples);
        return;
    }

    out.reserve(buckets * 2);
    for b in 0..buckets {
        let (lo, hi) = samples[bucket_range(b, n, buckets)]
            .iter()
            .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        out.push(lo);
        out.push(hi);
    }
}

pub fn lttb(samples: &[i16], target_points: usize) -> Vec<i16> {
    let mut out = Vec::new();
    lttb_into(samples, target_points, &mut out);
    out
}

pub fn lttb_into(samples: &[i16], target_points: usize, out: &mut Vec<i16>) {
    let n = samples.len();
    if n <= target_points {
        out.extend_from_slice(samples);
        return;
    }
    match target_points {
        0 => return,
        1 => {
            out.push(samples[0]);
            return;
        }
        2 => {
            out.push(samples[0]);
            out.push(samples[n - 1]);
            return;
        }
        _ => {}
    }

    out.reserve(target_points);
    out.push(samples[0]);

    let inner = target_points - 2;
    let bucket_size = (n - 2) as f64 / inner as f64;
    let inner_range = |b: usize| {
        let start = 1 + (b as f64 * bucket_size) as usize;
        let end = (1 + ((b + 1) as f64 * bucket_size) as usize).min(n - 1);
        start..end
    };

    let mut prev_x = 0.0f64;
    let mut prev_y = samples[0] as f64;

    for b in 0..inner {
        let current = inner_range(b);

        let (next_x, next_y) = if b + 1 < inner {
            let next = inner_range(b + 1);
            if next.is_empty() {
                (next.start as f64, samples[next.start.min(n - 1)] as f64)
            } else {
                let count = next.len() as f64;
                let sum_x: f64 = next.clone().map(|i| i as f64).sum();
                let sum_y: f64 = samples[next].iter().map(|&v| v as f64).sum();
                (sum_x / count, sum_y / count)
            }
        } else {
            ((n - 1) as f64, samples[n - 1] as f64)
        };

        let mut best = current.start;
        let mut best_area = -1.0f64;
        for i in current {
            let cx = i as f64;
            let cy = samples[i] as f64;
            let area = (prev_x * (cy - next_y) + cx * (next_y - prev_y) + next_x * (prev_y - cy)).abs();
            if area > best_area {
                best_area = area;
                best = i;
            }
        }

        out.push(samples[best]);
        prev_x = best as f64;
        prev_y = samples[best] as f64;
    }

    out.push(samples[n - 1]);
}
