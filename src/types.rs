use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemError};

/// Planar multi-channel audio: `samples` is `[channels, frames]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    samples: Array2<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Array2<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(StemError::Decode("sample rate must be positive".into()));
        }
        if samples.nrows() == 0 {
            return Err(StemError::Decode("waveform has no channels".into()));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Builds a waveform from interleaved samples, dropping a trailing partial frame.
    pub fn from_interleaved(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(StemError::Decode("waveform has no channels".into()));
        }
        let ch = channels as usize;
        let frames = interleaved.len() / ch;
        let samples = Array2::from_shape_fn((ch, frames), |(c, i)| interleaved[i * ch + c]);
        Self::new(samples, sample_rate)
    }

    pub fn silence(channels: usize, frames: usize, sample_rate: u32) -> Result<Self> {
        Self::new(Array2::zeros((channels, frames)), sample_rate)
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples.len());
        for frame in self.samples.columns() {
            out.extend(frame.iter().copied());
        }
        out
    }

    pub fn samples(&self) -> &Array2<f32> {
        &self.samples
    }

    pub fn into_samples(self) -> Array2<f32> {
        self.samples
    }

    pub fn channel(&self, index: usize) -> ArrayView1<'_, f32> {
        self.samples.row(index)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn frames(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// One named track: a model stem or a synthesized mix.
#[derive(Clone, Debug, PartialEq)]
pub struct Stem {
    pub name: String,
    pub waveform: Waveform,
}

/// Output of a single separation call, in the model's source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StemSet {
    stems: Vec<Stem>,
}

impl StemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a stem, keeping first-insertion order.
    pub fn insert(&mut self, name: impl Into<String>, waveform: Waveform) {
        let name = name.into();
        match self.stems.iter_mut().find(|s| s.name == name) {
            Some(existing) => existing.waveform = waveform,
            None => self.stems.push(Stem { name, waveform }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Waveform> {
        self.stems
            .iter()
            .find(|s| s.name == name)
            .map(|s| &s.waveform)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stems.iter().map(|s| s.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stem> {
        self.stems.iter()
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn into_stems(self) -> Vec<Stem> {
        self.stems
    }
}

impl FromIterator<(String, Waveform)> for StemSet {
    fn from_iter<I: IntoIterator<Item = (String, Waveform)>>(iter: I) -> Self {
        let mut set = StemSet::new();
        for (name, waveform) in iter {
            set.insert(name, waveform);
        }
        set
    }
}

/// Raw upload handed over by the transport layer.
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub name: String,
    pub path: String,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub stems: Vec<ResultEntry>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    #[default]
    Pcm16,
    Float32,
}
