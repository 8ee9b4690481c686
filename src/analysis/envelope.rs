//! MinMax envelope self-check against a periodic ground truth.
//!
//! Given one period of the reference waveform, the set of every (min, max)
//! pair that some cyclic window of `W` samples can produce is computed once
//! per `W` and cached. A decimated MinMax bucket is plausible if its pair, or
//! a neighbour within the LSB tolerance, is in that set.
//!
//! # Coupling with the decimator
//!
//! A MinMax decimator splitting `N` raw samples into `B` buckets produces
//! buckets of `floor(N / B)` or `floor(N / B) + 1` samples. The verifier only
//! builds those two window sizes. A decimator using any other bucketing rule
//! reads as a low match rate, never as an error.
//!
//! # Window sets
//!
//! For `W >= L` (period length) the only pair is the global (min, max).
//! Otherwise the period is extended cyclically to `L + W - 1` samples and two
//! monotonic deques produce all `L` sliding-window extrema in O(L). Pairs are
//! packed into a `u32` (`min` high, `max` low, each biased by `0x8000`),
//! sorted and deduplicated for binary search.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Default tolerance in LSB applied to both min and max.
pub const DEFAULT_TOLERANCE_LSB: u16 = 1;

/// Outcome of one [`EnvelopeVerifier::verify`] call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvelopeReport {
    pub total_buckets: usize,
    pub matched_buckets: usize,
    /// `matched / total`, or `-1.0` when verification was not possible
    pub match_rate: f64,
}

impl EnvelopeReport {
    fn skipped(total_buckets: usize) -> Self {
        Self {
            total_buckets,
            matched_buckets: 0,
            match_rate: -1.0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.match_rate < 0.0
    }
}

/// Pack a (min, max) pair into one sortable key.
pub fn pack_pair(lo: i16, hi: i16) -> u32 {
    let lo = (lo as u16 ^ 0x8000) as u32;
    let hi = (hi as u16 ^ 0x8000) as u32;
    (lo << 16) | hi
}

/// Sorted, deduplicated packed (min, max) keys of every cyclic window of
/// `window` samples over `period`.
pub fn build_window_set(period: &[i16], window: usize) -> Vec<u32> {
    let len = period.len();
    if window == 0 || len == 0 {
        return Vec::new();
    }

    if window >= len {
        let lo = period.iter().copied().min().unwrap_or(0);
        let hi = period.iter().copied().max().unwrap_or(0);
        return vec![pack_pair(lo, hi)];
    }

    let total = len + window - 1;
    let at = |i: usize| period[i % len];

    let mut keys = Vec::with_capacity(len);
    let mut mins: VecDeque<usize> = VecDeque::with_capacity(window);
    let mut maxs: VecDeque<usize> = VecDeque::with_capacity(window);

    for i in 0..total {
        let v = at(i);

        while mins.back().is_some_and(|&j| at(j) >= v) {
            mins.pop_back();
        }
        mins.push_back(i);
        if mins.front().is_some_and(|&j| j + window <= i) {
            mins.pop_front();
        }

        while maxs.back().is_some_and(|&j| at(j) <= v) {
            maxs.pop_back();
        }
        maxs.push_back(i);
        if maxs.front().is_some_and(|&j| j + window <= i) {
            maxs.pop_front();
        }

        if i + 1 >= window {
            if let (Some(&lo), Some(&hi)) = (mins.front(), maxs.front()) {
                keys.push(pack_pair(at(lo), at(hi)));
            }
        }
    }

    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Verifies MinMax output of a periodic signal.
#[derive(Debug, Clone)]
pub struct EnvelopeVerifier {
    period: Vec<i16>,
    tolerance: u16,
    cache: BTreeMap<usize, Vec<u32>>,
}

impl Default for EnvelopeVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeVerifier {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE_LSB)
    }

    /// Verifier accepting pairs within `lsb` of a valid pair on each side.
    pub fn with_tolerance(lsb: u16) -> Self {
        Self {
            period: Vec::new(),
            tolerance: lsb,
            cache: BTreeMap::new(),
        }
    }

    /// Install one period of ground truth. Drops all cached window sets.
    pub fn set_period(&mut self, period: &[i16]) {
        self.period.clear();
        self.period.extend_from_slice(period);
        self.cache.clear();
    }

    pub fn clear(&mut self) {
        self.period.clear();
        self.cache.clear();
    }

    pub fn is_ready(&self) -> bool {
        !self.period.is_empty()
    }

    pub fn period_len(&self) -> usize {
        self.period.len()
    }

    pub fn tolerance(&self) -> u16 {
        self.tolerance
    }

    /// Window sizes with a cached set, ascending.
    pub fn cached_window_sizes(&self) -> Vec<usize> {
        self.cache.keys().copied().collect()
    }

    fn ensure_window(&mut self, window: usize) {
        if !self.cache.contains_key(&window) {
            let set = build_window_set(&self.period, window);
            self.cache.insert(window, set);
        }
    }

    fn window_set(&self, window: usize) -> &[u32] {
        self.cache.get(&window).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check `decimated` (interleaved `[min0, max0, min1, max1, ...]`) which a
    /// MinMax decimator produced from `raw_sample_count` samples in
    /// `num_buckets` buckets.
    pub fn verify(
        &mut self,
        decimated: &[i16],
        num_buckets: usize,
        raw_sample_count: usize,
    ) -> EnvelopeReport {
        if !self.is_ready()
            || num_buckets == 0
            || raw_sample_count == 0
            || decimated.len() < num_buckets * 2
        {
            return EnvelopeReport::skipped(num_buckets);
        }

        let base = (raw_sample_count / num_buckets).max(1);
        let alt = base + 1;
        self.ensure_window(base);
        self.ensure_window(alt);

        let floor_set = self.window_set(base);
        let ceil_set = self.window_set(alt);
        let tol = self.tolerance as i32;

        let matched_buckets = decimated
            .chunks_exact(2)
            .take(num_buckets)
            .filter(|pair| {
                let (lo, hi) = (pair[0] as i32, pair[1] as i32);
                (-tol..=tol).any(|dl| {
                    (-tol..=tol).any(|dh| {
                        let (Ok(lo), Ok(hi)) = (i16::try_from(lo + dl), i16::try_from(hi + dh))
                        else {
                            return false;
                        };
                        let key = pack_pair(lo, hi);
                        floor_set.binary_search(&key).is_ok() || ceil_set.binary_search(&key).is_ok()
                    })
                })
            })
            .count();

        EnvelopeReport {
            total_buckets: num_buckets,
            matched_buckets,
            match_rate: matched_buckets as f64 / num_buckets as f64,
        }
    }
}
