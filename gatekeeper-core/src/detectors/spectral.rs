//! Detector 5 — Spectral Residual (§4.1.5).
//!
//! Cooley-Tukey radix-2 FFT over a sliding window, with pre-computed
//! twiddle factors so a refresh never allocates. Score is the saliency of
//! the current window's spectral residual (log-amplitude spectrum minus its
//! local average) relative to the residual's own mean magnitude — the
//! classic SR-CNN saliency map, without the CNN. A full FFT only runs every
//! `refresh_every` events (default 5); between refreshes the detector
//! returns the last computed score, which is the "cheap interpolation"
//! §4.1.5 allows in place of a fresh transform on every event.

use crate::util::{clamp01, sanitize};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const WINDOW: usize = 64; // power of two within its {16..256}
const LOCAL_AVG_RADIUS: usize = 3;
const DEFAULT_REFRESH_EVERY: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralDetector {
    refresh_every: u32,
    ring: [f64; WINDOW],
    ring_len: usize,
    ring_pos: usize,
    events_since_refresh: u32,
    twiddle_cos: Vec<f64>,
    twiddle_sin: Vec<f64>,
    last_score: f64,
}

impl SpectralDetector {
    pub fn new() -> Self {
        Self::with_refresh(DEFAULT_REFRESH_EVERY)
    }

    pub fn with_refresh(refresh_every: u32) -> Self {
        let half = WINDOW / 2;
        let mut twiddle_cos = Vec::with_capacity(half);
        let mut twiddle_sin = Vec::with_capacity(half);
        for k in 0..half {
            let angle = -2.0 * PI * k as f64 / WINDOW as f64;
            twiddle_cos.push(angle.cos());
            twiddle_sin.push(angle.sin());
        }
        Self {
            refresh_every: refresh_every.max(1),
            ring: [0.0; WINDOW],
            ring_len: 0,
            ring_pos: 0,
            events_since_refresh: 0,
            twiddle_cos,
            twiddle_sin,
            last_score: 0.0,
        }
    }

    pub fn update(&mut self, value: f64, _timestamp_ns: u64) -> f64 {
        let value = if value.is_finite() { value } else { 0.0 };
        self.ring[self.ring_pos] = value;
        self.ring_pos = (self.ring_pos + 1) % WINDOW;
        self.ring_len = (self.ring_len + 1).min(WINDOW);

        if self.ring_len < WINDOW {
            return 0.0;
        }

        self.events_since_refresh += 1;
        if self.events_since_refresh >= self.refresh_every {
            self.events_since_refresh = 0;
            self.last_score = self.refresh();
        }
        self.last_score
    }

    fn refresh(&mut self) -> f64 {
        // Unwind the ring buffer into time order, mean-centered.
        let mut re = [0.0f64; WINDOW];
        let mean: f64 = self.ring.iter().sum::<f64>() / WINDOW as f64;
        for i in 0..WINDOW {
            let idx = (self.ring_pos + i) % WINDOW;
            re[i] = self.ring[idx] - mean;
        }
        let mut im = [0.0f64; WINDOW];
        fft_radix2(&mut re, &mut im, &self.twiddle_cos, &self.twiddle_sin);

        let mut log_amp = [0.0f64; WINDOW];
        for i in 0..WINDOW {
            let amp = (re[i] * re[i] + im[i] * im[i]).sqrt();
            log_amp[i] = (amp.max(1e-12)).ln();
        }

        // Local average filter (spectral residual = log amplitude minus its
        // own local smoothing) over a small radius, wrapping at the edges
        // since the spectrum is periodic.
        let mut residual = [0.0f64; WINDOW];
        for i in 0..WINDOW {
            let mut sum = 0.0;
            let mut count = 0usize;
            for d in -(LOCAL_AVG_RADIUS as isize)..=(LOCAL_AVG_RADIUS as isize) {
                let j = ((i as isize + d).rem_euclid(WINDOW as isize)) as usize;
                sum += log_amp[j];
                count += 1;
            }
            let local_avg = sum / count as f64;
            residual[i] = log_amp[i] - local_avg;
        }

        let mean_abs_residual =
            residual.iter().map(|x| x.abs()).sum::<f64>() / WINDOW as f64;
        let max_residual = residual.iter().cloned().fold(0.0, f64::max);

        if mean_abs_residual <= 1e-9 {
            return 0.0;
        }
        clamp01(sanitize((max_residual / mean_abs_residual) / 6.0))
    }
}

impl Default for SpectralDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place iterative radix-2 Cooley-Tukey FFT, `WINDOW` fixed at
/// construction time so `twiddle_cos`/`twiddle_sin` never need recomputing.
fn fft_radix2(re: &mut [f64; WINDOW], im: &mut [f64; WINDOW], tw_cos: &[f64], tw_sin: &[f64]) {
    let n = WINDOW;
    // Bit-reversal permutation.
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i as u32).reverse_bits() >> (32 - bits);
        let j = j as usize;
        if j > i {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut size = 2;
    while size <= n {
        let half = size / 2;
        let stride = n / size;
        let mut start = 0;
        while start < n {
            for k in 0..half {
                let tw_idx = k * stride;
                let (c, s) = (tw_cos[tw_idx], tw_sin[tw_idx]);
                let i0 = start + k;
                let i1 = start + k + half;
                let re1 = re[i1] * c - im[i1] * s;
                let im1 = re[i1] * s + im[i1] * c;
                let re0 = re[i0];
                let im0 = im[i0];
                re[i0] = re0 + re1;
                im[i0] = im0 + im1;
                re[i1] = re0 - re1;
                im[i1] = im0 - im1;
            }
            start += size;
        }
        size *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_signal_low_score() {
        let mut d = SpectralDetector::new();
        let mut score = 1.0;
        for i in 0..200u64 {
            score = d.update(1.0, i);
        }
        assert!(score < 0.3, "constant-signal score was {score}");
    }

    #[test]
    fn test_spike_raises_score() {
        let mut d = SpectralDetector::new();
        for i in 0..WINDOW as u64 * 4 {
            d.update(1.0, i);
        }
        let mut score = 0.0;
        for _ in 0..5 {
            score = d.update(500.0, 1_000);
        }
        assert!(score > 0.0);
    }

    #[test]
    fn test_fft_parseval() {
        let mut re = [0.0f64; WINDOW];
        let mut im = [0.0f64; WINDOW];
        for (i, r) in re.iter_mut().enumerate() {
            *r = (i as f64).sin();
        }
        let energy_time: f64 = re.iter().map(|x| x * x).sum();

        let half = WINDOW / 2;
        let mut tw_cos = Vec::with_capacity(half);
        let mut tw_sin = Vec::with_capacity(half);
        for k in 0..half {
            let angle = -2.0 * PI * k as f64 / WINDOW as f64;
            tw_cos.push(angle.cos());
            tw_sin.push(angle.sin());
        }
        fft_radix2(&mut re, &mut im, &tw_cos, &tw_sin);
        let energy_freq: f64 =
            re.iter().zip(im.iter()).map(|(r, i)| r * r + i * i).sum::<f64>() / WINDOW as f64;
        assert!((energy_time - energy_freq).abs() < 1e-6, "{energy_time} vs {energy_freq}");
    }
}
