//! Spectral front end for the HTDemucs ONNX graph.

use ndarray::{Array3, ArrayView1};
use once_cell::sync::Lazy;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

static PLANS: Lazy<Mutex<HashMap<usize, Arc<StftPlan>>>> = Lazy::new(Default::default);

struct StftPlan {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

fn plan(n_fft: usize) -> Arc<StftPlan> {
    let mut plans = PLANS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    plans
        .entry(n_fft)
        .or_insert_with(|| {
            Arc::new(StftPlan {
                fft: FftPlanner::new().plan_fft_forward(n_fft),
                window: hann(n_fft),
            })
        })
        .clone()
}

/// Symmetric Hann window.
pub fn hann(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = (n - 1) as f32;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Number of frames a centered STFT produces for `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Centered, Hann-windowed STFT of one channel, zero-padded by `n_fft / 2`
/// on both sides. Returns `[bins = n_fft / 2, frames]` complex values.
pub fn stft_centered(signal: ArrayView1<'_, f32>, n_fft: usize, hop: usize) -> Vec<Vec<Complex32>> {
    let plan = plan(n_fft);
    let pad = n_fft / 2;
    let len = signal.len();
    let frames = frame_count(len, hop);
    let bins = n_fft / 2;

    let mut padded = vec![0.0f32; len + 2 * pad];
    for (dst, &src) in padded[pad..pad + len].iter_mut().zip(signal.iter()) {
        *dst = src;
    }

    let mut out = vec![vec![Complex32::new(0.0, 0.0); frames]; bins];
    let mut buf = vec![Complex32::new(0.0, 0.0); n_fft];
    for fr in 0..frames {
        let start = fr * hop;
        for (i, slot) in buf.iter_mut().enumerate() {
            let x = padded.get(start + i).copied().unwrap_or(0.0);
            *slot = Complex32::new(x * plan.window[i], 0.0);
        }
        plan.fft.process(&mut buf);
        for (bin, row) in out.iter_mut().enumerate() {
            row[fr] = buf[bin];
        }
    }
    out
}

/// Complex-as-channels spectrogram: for each input channel `c`, rows `2c`
/// and `2c + 1` hold the real and imaginary parts. Shape
/// `[2 * channels, bins, frames]`.
pub fn complex_as_channels(
    channels: &[ArrayView1<'_, f32>],
    n_fft: usize,
    hop: usize,
) -> Array3<f32> {
    let len = channels.first().map(|c| c.len()).unwrap_or(0);
    let bins = n_fft / 2;
    let frames = frame_count(len, hop);
    let mut out = Array3::<f32>::zeros((2 * channels.len(), bins, frames));

    for (c, signal) in channels.iter().enumerate() {
        let spec = stft_centered(*signal, n_fft, hop);
        for (bin, row) in spec.iter().enumerate() {
            for (fr, v) in row.iter().enumerate() {
                out[(2 * c, bin, fr)] = v.re;
                out[(2 * c + 1, bin, fr)] = v.im;
            }
        }
    }
    out
}
