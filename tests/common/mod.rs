#![allow(dead_code)]

use ndarray::{Array3, ArrayView2};
use std::{
    f32::consts::PI,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use stem_splitter_service::{
    EngineOptions, Processor, Result, SeparationEngine, SeparationModel, ServiceConfig, Workspace,
};

pub const SOURCES: [&str; 4] = ["drums", "bass", "other", "vocals"];
/// Powers of two so scaled stems are exact.
pub const GAINS: [f32; 4] = [0.5, 0.25, 0.125, 0.125];
pub const SR: u32 = 44_100;

/// Deterministic stand-in for a separation network: stem `k` is the
/// mixture scaled by `gains[k]`.
pub struct GainModel {
    sources: Vec<String>,
    gains: Vec<f32>,
    sample_rate: u32,
    channels: usize,
    segment: Option<usize>,
    concurrent: bool,
    delay: Duration,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl GainModel {
    pub fn demucs_like() -> Self {
        Self {
            sources: SOURCES.iter().map(|s| s.to_string()).collect(),
            gains: GAINS.to_vec(),
            sample_rate: SR,
            channels: 2,
            segment: None,
            concurrent: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_sources(mut self, sources: &[&str], gains: &[f32]) -> Self {
        self.sources = sources.iter().map(|s| s.to_string()).collect();
        self.gains = gains.to_vec();
        self
    }

    pub fn with_segment(mut self, frames: usize) -> Self {
        self.segment = Some(frames);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn concurrent(mut self, yes: bool) -> Self {
        self.concurrent = yes;
        self
    }
}

impl SeparationModel for GainModel {
    fn sources(&self) -> &[String] {
        &self.sources
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn segment_frames(&self) -> Option<usize> {
        self.segment
    }

    fn concurrent_inference(&self) -> bool {
        self.concurrent
    }

    fn separate_segment(&self, segment: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let (channels, frames) = segment.dim();
        let out = Array3::from_shape_fn((self.sources.len(), channels, frames), |(s, c, i)| {
            segment[(c, i)] * self.gains[s]
        });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(out)
    }
}

pub fn engine_with(model: GainModel) -> Arc<SeparationEngine> {
    Arc::new(SeparationEngine::new(Arc::new(model), EngineOptions::default()).unwrap())
}

pub fn processor_in(work_dir: &Path, cfg: ServiceConfig) -> Processor {
    let cfg = ServiceConfig {
        work_dir: work_dir.to_path_buf(),
        ..cfg
    };
    let workspace = Workspace::new(&cfg.work_dir).unwrap();
    Processor::new(engine_with(GainModel::demucs_like()), workspace, &cfg)
}

/// Interleaved sine, identical on every channel.
pub fn sine(sample_rate: u32, channels: u16, seconds: f32, freq: f32, amp: f32) -> Vec<f32> {
    let frames = (sample_rate as f32 * seconds) as usize;
    let mut out = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let v = (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * amp;
        for _ in 0..channels {
            out.push(v);
        }
    }
    out
}

/// 16-bit PCM WAV bytes for the given interleaved samples.
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer
                .write_sample((s * i16::MAX as f32).round() as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn mono_tone_wav(seconds: f32, freq: f32, amp: f32) -> Vec<u8> {
    wav_bytes(&sine(SR, 1, seconds, freq, amp), SR, 1)
}

pub fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}
