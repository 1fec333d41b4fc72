//! Separation models and the plumbing that provisions them.

pub mod manager;
#[cfg(feature = "onnx")]
pub mod onnx;

use ndarray::{Array3, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::ModelSource,
    error::{Result, StemError},
};

/// A pretrained source-separation network.
///
/// Implementations are loaded once and shared read-only across requests.
/// `separate_segment` receives `[channels, frames]` with exactly
/// [`SeparationModel::channels`] rows and returns `[sources, channels, frames]`
/// in the order of [`SeparationModel::sources`].
pub trait SeparationModel: Send + Sync {
    fn sources(&self) -> &[String];

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// Fixed number of frames consumed per call, if the network has one.
    fn segment_frames(&self) -> Option<usize> {
        None
    }

    /// Whether two threads may call `separate_segment` at the same time.
    /// When false the engine serializes every call.
    fn concurrent_inference(&self) -> bool {
        false
    }

    fn separate_segment(&self, segment: ArrayView2<'_, f32>) -> Result<Array3<f32>>;

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: "unnamed".into(),
            backend: "unknown".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Describes a downloadable model and the tensor contract it follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub segment: Option<usize>,
    pub stems: Vec<String>,
    #[serde(default)]
    pub input_name: Option<String>,
    #[serde(default)]
    pub spec_input_name: Option<String>,
    #[serde(default)]
    pub output_name: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

fn default_channels() -> usize {
    2
}

/// Graph tensor names of the published htdemucs ONNX export.
pub const DEFAULT_INPUT: &str = "input";
pub const DEFAULT_SPEC_INPUT: &str = "x";
pub const DEFAULT_OUTPUT: &str = "add_67";

/// Which graph tensors receive the waveform and spectrogram, and which one
/// holds the stems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBinding {
    pub input: String,
    pub spec_input: Option<String>,
    pub output: String,
}

impl ModelManifest {
    /// Matches the manifest's tensor names against the graph.
    ///
    /// Names the manifest leaves out fall back to the htdemucs export names,
    /// or to the only candidate when the graph has a single one. Every graph
    /// input must end up bound and the output must exist.
    pub fn bind_tensors(&self, inputs: &[String], outputs: &[String]) -> Result<TensorBinding> {
        let input = pick("input", self.input_name.as_deref(), DEFAULT_INPUT, inputs)?;

        let spec_input = match self.spec_input_name.as_deref() {
            Some(name) => Some(require("input", name, inputs)?),
            None => inputs
                .iter()
                .find(|n| n.as_str() == DEFAULT_SPEC_INPUT && **n != input)
                .cloned(),
        };

        let unbound: Vec<&String> = inputs
            .iter()
            .filter(|n| **n != input && Some(*n) != spec_input.as_ref())
            .collect();
        if !unbound.is_empty() {
            return Err(StemError::Manifest(format!(
                "model `{}` leaves graph inputs {unbound:?} unbound; set input_name/spec_input_name",
                self.name
            )));
        }

        let output = pick("output", self.output_name.as_deref(), DEFAULT_OUTPUT, outputs)?;

        Ok(TensorBinding {
            input,
            spec_input,
            output,
        })
    }

    pub fn resolve_primary_artifact(&self) -> std::result::Result<&Artifact, String> {
        self.artifacts
            .iter()
            .find(|a| a.file.ends_with(".onnx"))
            .or_else(|| self.artifacts.first())
            .ok_or_else(|| format!("manifest `{}` lists no artifacts", self.name))
    }
}

fn require(kind: &str, name: &str, available: &[String]) -> Result<String> {
    if available.iter().any(|n| n == name) {
        Ok(name.to_string())
    } else {
        Err(StemError::Manifest(format!(
            "model has no {kind} `{name}` ({kind}s: {available:?})"
        )))
    }
}

fn pick(kind: &str, configured: Option<&str>, default: &str, available: &[String]) -> Result<String> {
    if let Some(name) = configured {
        return require(kind, name, available);
    }
    if available.iter().any(|n| n == default) {
        return Ok(default.to_string());
    }
    match available {
        [only] => Ok(only.clone()),
        _ => Err(StemError::Manifest(format!(
            "cannot tell which {kind} to use among {available:?}; name it in the manifest"
        ))),
    }
}

/// Resolves the configured model source and builds its inference backend.
pub fn load_model(source: &ModelSource) -> Result<Arc<dyn SeparationModel>> {
    let handle = match (&source.path, &source.manifest_url) {
        (Some(path), _) => manager::local_model(path)?,
        (None, Some(url)) => manager::ensure_model(url, source.cache_dir.as_deref())?,
        (None, None) => {
            return Err(StemError::Config(
                "no model configured: set model.path or model.manifest_url".into(),
            ))
        }
    };
    backend_for(&handle)
}

#[cfg(feature = "onnx")]
fn backend_for(handle: &manager::ModelHandle) -> Result<Arc<dyn SeparationModel>> {
    match handle.manifest.backend.as_str() {
        "onnx" | "ort" => Ok(Arc::new(onnx::OnnxDemucs::load(handle)?)),
        other => Err(StemError::Manifest(format!(
            "unsupported backend `{other}`"
        ))),
    }
}

#[cfg(not(feature = "onnx"))]
fn backend_for(handle: &manager::ModelHandle) -> Result<Arc<dyn SeparationModel>> {
    Err(StemError::Config(format!(
        "model `{}` needs the `{}` backend; rebuild with `--features onnx`",
        handle.manifest.name, handle.manifest.backend
    )))
}
