use ndarray::Array2;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::{
    error::{Result, StemError},
    types::Waveform,
};

const SINC_LEN: usize = 256;

/// Converts a whole recording to `target_rate`.
///
/// The result has `round(frames * target / source)` frames and is aligned
/// with the input (the filter delay is removed).
pub fn resample(input: &Waveform, target_rate: u32) -> Result<Waveform> {
    if input.sample_rate() == target_rate {
        return Ok(input.clone());
    }
    if target_rate == 0 {
        return Err(StemError::Resample("target sample rate is zero".into()));
    }

    let ratio = target_rate as f64 / input.sample_rate() as f64;
    let frames = input.frames();
    let channels = input.channels();
    let expected = (frames as f64 * ratio).round() as usize;
    if frames == 0 {
        return Waveform::silence(channels, 0, target_rate);
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    // trailing zeros flush the filter tail into the output
    let padded = frames + 2 * SINC_LEN;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, padded, channels)
        .map_err(|e| StemError::Resample(e.to_string()))?;

    let waves_in: Vec<Vec<f32>> = input
        .samples()
        .rows()
        .into_iter()
        .map(|row| {
            let mut v = row.to_vec();
            v.resize(padded, 0.0);
            v
        })
        .collect();

    let waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| StemError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let out = Array2::from_shape_fn((channels, expected), |(c, i)| {
        waves_out[c].get(delay + i).copied().unwrap_or(0.0)
    });

    debug!(
        from = input.sample_rate(),
        to = target_rate,
        frames_in = frames,
        frames_out = expected,
        "resampled input"
    );
    Waveform::new(out, target_rate)
}
