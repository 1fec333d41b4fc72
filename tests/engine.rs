mod common;

use approx::assert_abs_diff_eq;
use common::{engine_with, sine, GainModel, GAINS, SOURCES, SR};
use ndarray::{Array2, Array3, ArrayView2};
use std::{
    f32::consts::PI,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use stem_splitter_service::{
    EngineOptions, Result, SeparationEngine, SeparationModel, StemError, Waveform,
};

fn stereo(frames: usize) -> Waveform {
    let samples = Array2::from_shape_fn((2, frames), |(c, i)| {
        let (freq, amp) = if c == 0 { (220.0, 0.4) } else { (330.0, 0.3) };
        (2.0 * PI * freq * i as f32 / SR as f32).sin() * amp
    });
    Waveform::new(samples, SR).unwrap()
}

#[test]
fn stem_set_matches_model_vocabulary() {
    let engine = engine_with(GainModel::demucs_like());
    let input = stereo(4410);

    let stems = engine.separate(&input).unwrap();

    assert_eq!(stems.len(), SOURCES.len());
    assert_eq!(stems.names().collect::<Vec<_>>(), SOURCES.to_vec());
    for stem in stems.iter() {
        assert_eq!(stem.waveform.frames(), input.frames());
        assert_eq!(stem.waveform.sample_rate(), SR);
        assert_eq!(stem.waveform.channels(), 2);
    }
}

#[test]
fn mono_input_yields_mono_stems() {
    let engine = engine_with(GainModel::demucs_like());
    let mono = Waveform::from_interleaved(&sine(SR, 1, 0.1, 440.0, 0.5), 1, SR).unwrap();

    let stems = engine.separate(&mono).unwrap();

    for (stem, gain) in stems.iter().zip(GAINS) {
        assert_eq!(stem.waveform.channels(), 1);
        for (got, x) in stem.waveform.channel(0).iter().zip(mono.channel(0).iter()) {
            assert_eq!(*got, x * gain);
        }
    }
}

#[test]
fn separation_is_deterministic() {
    let engine = engine_with(GainModel::demucs_like().with_segment(1000));
    let input = stereo(3333);
    assert_eq!(engine.separate(&input).unwrap(), engine.separate(&input).unwrap());
}

#[test]
fn long_input_is_segmented_and_blended() {
    let model = Arc::new(GainModel::demucs_like().with_segment(1000));
    let engine = SeparationEngine::new(model.clone(), EngineOptions { overlap: 0.25 }).unwrap();
    let input = stereo(4500);

    let stems = engine.separate(&input).unwrap();

    // hop 750: starts 0, 750, .., 3750
    assert_eq!(model.calls.load(Ordering::SeqCst), 6);
    for (stem, gain) in stems.iter().zip(GAINS) {
        assert_eq!(stem.waveform.frames(), 4500);
        for c in 0..2 {
            for (got, x) in stem
                .waveform
                .channel(c)
                .iter()
                .zip(input.channel(c).iter())
            {
                assert_abs_diff_eq!(*got, x * gain, epsilon = 1e-5);
            }
        }
    }
}

#[test]
fn short_input_is_padded_to_one_segment() {
    let model = Arc::new(GainModel::demucs_like().with_segment(1000));
    let engine = SeparationEngine::new(model.clone(), EngineOptions::default()).unwrap();

    let stems = engine.separate(&stereo(10)).unwrap();

    assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    assert!(stems.iter().all(|s| s.waveform.frames() == 10));
}

#[test]
fn rejects_sample_rate_mismatch() {
    let engine = engine_with(GainModel::demucs_like());
    let input = Waveform::from_interleaved(&sine(22_050, 1, 0.1, 440.0, 0.5), 1, 22_050).unwrap();

    match engine.separate(&input) {
        Err(StemError::UnsupportedSampleRate { expected, actual }) => {
            assert_eq!(expected, SR);
            assert_eq!(actual, 22_050);
        }
        other => panic!("expected UnsupportedSampleRate, got {other:?}"),
    }
}

#[test]
fn rejects_empty_and_unsupported_layouts() {
    let engine = engine_with(GainModel::demucs_like());

    let empty = Waveform::silence(2, 0, SR).unwrap();
    assert!(matches!(
        engine.separate(&empty),
        Err(StemError::ModelInference(_))
    ));

    let surround = Waveform::silence(6, 100, SR).unwrap();
    assert!(matches!(
        engine.separate(&surround),
        Err(StemError::ModelInference(msg)) if msg.contains("channel")
    ));
}

struct ShortChangedModel {
    sources: Vec<String>,
}

impl SeparationModel for ShortChangedModel {
    fn sources(&self) -> &[String] {
        &self.sources
    }
    fn sample_rate(&self) -> u32 {
        SR
    }
    fn channels(&self) -> usize {
        2
    }
    fn separate_segment(&self, segment: ArrayView2<'_, f32>) -> Result<Array3<f32>> {
        // one source short
        let (c, t) = segment.dim();
        Ok(Array3::zeros((self.sources.len() - 1, c, t)))
    }
}

#[test]
fn malformed_model_output_is_an_inference_error() {
    let model = ShortChangedModel {
        sources: SOURCES.iter().map(|s| s.to_string()).collect(),
    };
    let engine = SeparationEngine::new(Arc::new(model), EngineOptions::default()).unwrap();

    assert!(matches!(
        engine.separate(&stereo(100)),
        Err(StemError::ModelInference(msg)) if msg.contains("shape")
    ));
}

#[test]
fn serialized_models_never_run_concurrently() {
    let model = Arc::new(
        GainModel::demucs_like()
            .concurrent(false)
            .with_delay(Duration::from_millis(20)),
    );
    let engine = SeparationEngine::new(model.clone(), EngineOptions::default()).unwrap();
    let input = stereo(256);

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| engine.separate(&input).unwrap());
        }
    });

    assert_eq!(model.calls.load(Ordering::SeqCst), 4);
    assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn invalid_engine_options_are_rejected() {
    let err = SeparationEngine::new(
        Arc::new(GainModel::demucs_like()),
        EngineOptions { overlap: 1.0 },
    )
    .err()
    .expect("overlap of 1.0 must be rejected");
    assert!(matches!(err, StemError::Config(_)));

    let err = SeparationEngine::new(
        Arc::new(GainModel::demucs_like().with_sources(&["vocals", "vocals"], &[1.0, 1.0])),
        EngineOptions::default(),
    )
    .err()
    .expect("duplicate sources must be rejected");
    assert!(matches!(err, StemError::Config(_)));
}
