//! HTDemucs exported to ONNX, run through ONNX Runtime.
//!
//! The graph takes the waveform `[1, C, T]` and, for the hybrid variant, its
//! complex-as-channels spectrogram `[1, 2C, F, frames]`; it returns the
//! time-domain stems `[1, S, C, T]`.

use crate::{
    core::dsp::complex_as_channels,
    error::{Result, StemError},
    model::{manager::ModelHandle, ModelInfo, ModelManifest, SeparationModel, TensorBinding},
};

use ndarray::{Array3, ArrayView1, ArrayView2};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{DynValue, Tensor},
};
use std::sync::Mutex;
use tracing::info;

/// Samples per inference window of the published htdemucs export.
pub const DEMUCS_SEGMENT: usize = 343_980;
const DEMUCS_NFFT: usize = 4096;
const DEMUCS_HOP: usize = 1024;

pub struct OnnxDemucs {
    session: Mutex<Session>,
    manifest: ModelManifest,
    binding: TensorBinding,
}

impl OnnxDemucs {
    pub fn load(handle: &ModelHandle) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&handle.local_path)?;

        let mf = &handle.manifest;
        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let binding = mf.bind_tensors(&inputs, &outputs)?;

        info!(
            model = %mf.name,
            version = %mf.version,
            path = %handle.local_path.display(),
            input = %binding.input,
            spec_input = ?binding.spec_input,
            output = %binding.output,
            "onnx session created"
        );

        Ok(Self {
            session: Mutex::new(session),
            manifest: mf.clone(),
            binding,
        })
    }
}

impl SeparationModel for OnnxDemucs {
    fn sources(&self) -> &[String] {
        &self.manifest.stems
    }

    fn sample_rate(&self) -> u32 {
        self.manifest.sample_rate
    }

    fn channels(&self) -> usize {
        self.manifest.channels
    }

    fn segment_frames(&self) -> Option<usize> {
        Some(self.manifest.segment.unwrap_or(DEMUCS_SEGMENT))
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.manifest.name.clone(),
            backend: "onnx".into(),
        }
    }

    fn separate_segment(&self, segment: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let (channels, t) = segment.dim();
        let planar: Vec<f32> = segment.iter().copied().collect();

        let mut inputs: Vec<(String, DynValue)> = Vec::with_capacity(2);
        let time = Tensor::from_array((vec![1usize, channels, t], planar))?;
        inputs.push((self.binding.input.clone(), time.into_dyn()));

        if let Some(spec_name) = &self.binding.spec_input {
            let rows: Vec<ArrayView1<'_, f32>> = segment.rows().into_iter().collect();
            let spec = complex_as_channels(&rows, DEMUCS_NFFT, DEMUCS_HOP);
            let (c, f, frames) = spec.dim();
            let spec = Tensor::from_array((vec![1usize, c, f, frames], spec.into_raw_vec()))?;
            inputs.push((spec_name.clone(), spec.into_dyn()));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| StemError::ModelInference("onnx session lock poisoned".into()))?;
        let outputs = session.run(inputs)?;

        let value = outputs
            .get(self.binding.output.as_str())
            .ok_or_else(|| {
                StemError::ModelInference(format!("model produced no `{}` output", self.binding.output))
            })?;

        let (_shape, data) = value.try_extract_tensor::<f32>()?;
        let sources = self.manifest.stems.len();
        let expected = sources * channels * t;
        if data.len() != expected {
            return Err(StemError::ModelInference(format!(
                "output has {} values, expected {expected} ([1, {sources}, {channels}, {t}])",
                data.len()
            )));
        }

        Array3::from_shape_vec((sources, channels, t), data.to_vec())
            .map_err(|e| StemError::ModelInference(e.to_string()))
    }
}
