use crate::{
    error::{Result, StemError},
    model::{ModelInfo, SeparationModel},
    types::{StemSet, Waveform},
};

use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Fraction of a segment shared with the next one, in `[0, 1)`.
    pub overlap: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { overlap: 0.25 }
    }
}

/// Runs a shared, preloaded model over whole recordings.
///
/// The engine never resamples and never mutates the model. Models that are
/// not safe for concurrent inference are invoked under a single engine-wide
/// lock.
pub struct SeparationEngine {
    model: Arc<dyn SeparationModel>,
    overlap: f32,
    inference_lock: Option<Mutex<()>>,
}

impl SeparationEngine {
    pub fn new(model: Arc<dyn SeparationModel>, opts: EngineOptions) -> Result<Self> {
        if !(0.0..1.0).contains(&opts.overlap) {
            return Err(StemError::Config(format!(
                "overlap must be in [0, 1), got {}",
                opts.overlap
            )));
        }
        if model.sources().is_empty() {
            return Err(StemError::Config("model declares no sources".into()));
        }
        for (i, name) in model.sources().iter().enumerate() {
            let plain = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !plain || model.sources()[..i].contains(name) {
                return Err(StemError::Config(format!(
                    "model source `{name}` is not a unique plain name"
                )));
            }
        }
        if model.channels() == 0 || model.sample_rate() == 0 {
            return Err(StemError::Config(
                "model declares zero channels or sample rate".into(),
            ));
        }
        if model.segment_frames() == Some(0) {
            return Err(StemError::Config("model segment length is zero".into()));
        }

        let inference_lock = (!model.concurrent_inference()).then(|| Mutex::new(()));
        let info = model.info();
        info!(
            model = %info.name,
            backend = %info.backend,
            sources = ?model.sources(),
            sample_rate = model.sample_rate(),
            serialized = inference_lock.is_some(),
            "separation engine ready"
        );

        Ok(Self {
            model,
            overlap: opts.overlap,
            inference_lock,
        })
    }

    pub fn sources(&self) -> &[String] {
        self.model.sources()
    }

    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    pub fn model_info(&self) -> ModelInfo {
        self.model.info()
    }

    /// Splits `input` into one waveform per model source.
    ///
    /// Every stem has the input's frame count and channel layout.
    pub fn separate(&self, input: &Waveform) -> Result<StemSet> {
        if input.is_empty() {
            return Err(StemError::ModelInference("input waveform is empty".into()));
        }
        let expected = self.model.sample_rate();
        if input.sample_rate() != expected {
            return Err(StemError::UnsupportedSampleRate {
                expected,
                actual: input.sample_rate(),
            });
        }

        let mixture = self.adapt_channels(input)?;
        let separated = self.run_segments(mixture.view())?;

        // fold back to the caller's layout
        let separated = if input.channels() != separated.shape()[1] {
            separated
                .mean_axis(Axis(1))
                .ok_or_else(|| StemError::ModelInference("model returned no channels".into()))?
                .insert_axis(Axis(1))
        } else {
            separated
        };

        let mut stems = StemSet::new();
        for (i, name) in self.model.sources().iter().enumerate() {
            let samples = separated.index_axis(Axis(0), i).to_owned();
            stems.insert(name.clone(), Waveform::new(samples, expected)?);
        }
        Ok(stems)
    }

    fn adapt_channels(&self, input: &Waveform) -> Result<Array2<f32>> {
        let want = self.model.channels();
        match input.channels() {
            n if n == want => Ok(input.samples().clone()),
            1 => {
                let mono = input.channel(0);
                Ok(Array2::from_shape_fn((want, input.frames()), |(_, i)| mono[i]))
            }
            n => Err(StemError::ModelInference(format!(
                "unsupported channel count {n} (model takes {want} or mono)"
            ))),
        }
    }

    fn run_segments(&self, mixture: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let (channels, frames) = mixture.dim();
        let sources = self.model.sources().len();
        let segment = self.model.segment_frames().unwrap_or(frames);

        if frames <= segment {
            let out = self.infer_padded(mixture, segment)?;
            return Ok(out.slice(s![.., .., ..frames]).to_owned());
        }

        let hop = ((segment as f32) * (1.0 - self.overlap)).round().max(1.0) as usize;
        let window = triangular_window(segment);

        let mut acc = Array3::<f32>::zeros((sources, channels, frames));
        let mut weight_sum = Array1::<f32>::zeros(frames);

        let total = (frames - segment).div_ceil(hop) + 1;
        let mut start = 0usize;
        for index in 0..total {
            let end = (start + segment).min(frames);
            let len = end - start;
            debug!(segment = index + 1, total, start, len, "separating segment");

            let out = self.infer_padded(mixture.slice(s![.., start..end]), segment)?;
            let w = window.slice(s![..len]);

            let weighted = &out.slice(s![.., .., ..len]) * &w;
            let mut dst = acc.slice_mut(s![.., .., start..end]);
            dst += &weighted;
            let mut wdst = weight_sum.slice_mut(s![start..end]);
            wdst += &w;

            start += hop;
        }

        acc /= &weight_sum;
        Ok(acc)
    }

    /// Zero-pads `chunk` to `segment` frames and runs one inference call.
    fn infer_padded(&self, chunk: ArrayView2<'_, f32>, segment: usize) -> Result<Array3<f32>> {
        let (channels, len) = chunk.dim();
        let out = if len == segment {
            self.infer(chunk)?
        } else {
            let mut padded = Array2::<f32>::zeros((channels, segment));
            padded.slice_mut(s![.., ..len]).assign(&chunk);
            self.infer(padded.view())?
        };

        let (s_out, c_out, t_out) = out.dim();
        if s_out != self.model.sources().len() || c_out != channels || t_out < len {
            return Err(StemError::ModelInference(format!(
                "model returned shape [{s_out}, {c_out}, {t_out}], expected [{}, {channels}, >= {len}]",
                self.model.sources().len()
            )));
        }
        Ok(out)
    }

    fn infer(&self, segment: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let _guard = self
            .inference_lock
            .as_ref()
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.model.separate_segment(segment)
    }
}

/// Strictly positive triangle so every covered frame gets weight.
fn triangular_window(len: usize) -> Array1<f32> {
    Array1::from_shape_fn(len, |i| (i + 1).min(len - i) as f32)
}
