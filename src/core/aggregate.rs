use ndarray::Array2;
use tracing::{debug, warn};

use crate::{
    core::lane::Lane,
    error::{Result, StemError},
    types::{Stem, StemSet, Waveform},
};

pub const VOCALS: &str = "vocals";
pub const INSTRUMENTAL: &str = "instrumental";

/// Tracks selected for a lane, plus how many samples were clamped while mixing.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub tracks: Vec<Stem>,
    pub clipped_samples: usize,
}

impl Aggregation {
    pub fn names(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Waveform> {
        self.tracks
            .iter()
            .find(|t| t.name == name)
            .map(|t| &t.waveform)
    }
}

/// Applies a lane to a separation result.
///
/// Raw lanes pass the stems through untouched. Reduction lanes return
/// `vocals` unchanged followed by `instrumental`, the clamped sum of every
/// other stem. Misaligned stems are rejected for both lanes.
pub fn aggregate(stems: StemSet, lane: Lane) -> Result<Aggregation> {
    check_alignment(&stems)?;

    match lane {
        Lane::Raw => Ok(Aggregation {
            tracks: stems.into_stems(),
            clipped_samples: 0,
        }),
        Lane::Reduction => reduce(stems),
    }
}

fn reduce(stems: StemSet) -> Result<Aggregation> {
    let mut vocals = None;
    let mut rest = Vec::new();
    for stem in stems.into_stems() {
        if stem.name == VOCALS {
            vocals = Some(stem);
        } else {
            rest.push(stem.waveform);
        }
    }
    let vocals = vocals.ok_or_else(|| StemError::MissingStem(VOCALS.into()))?;

    let (instrumental, clipped_samples) = overlay(
        &rest,
        vocals.waveform.channels(),
        vocals.waveform.frames(),
        vocals.waveform.sample_rate(),
    )?;

    if clipped_samples > 0 {
        warn!(
            clipped_samples,
            "instrumental mix exceeded full scale, samples clamped"
        );
    }
    debug!(sources = rest.len(), "instrumental synthesized");

    Ok(Aggregation {
        tracks: vec![
            vocals,
            Stem {
                name: INSTRUMENTAL.into(),
                waveform: instrumental,
            },
        ],
        clipped_samples,
    })
}

/// Sums aligned waveforms sample by sample and clamps the result to [-1, 1].
///
/// With no inputs the result is silence of the requested shape. Returns the
/// mix and the number of samples that had to be clamped.
pub fn overlay(
    parts: &[Waveform],
    channels: usize,
    frames: usize,
    sample_rate: u32,
) -> Result<(Waveform, usize)> {
    let mut acc = Array2::<f32>::zeros((channels, frames));

    for part in parts {
        if part.sample_rate() != sample_rate
            || part.channels() != channels
            || part.frames() != frames
        {
            return Err(StemError::StemAlignment(format!(
                "cannot overlay {}ch/{}fr/{}Hz onto {}ch/{}fr/{}Hz",
                part.channels(),
                part.frames(),
                part.sample_rate(),
                channels,
                frames,
                sample_rate
            )));
        }
        acc += part.samples();
    }

    let mut clipped = 0usize;
    acc.mapv_inplace(|x| {
        let c = x.clamp(-1.0, 1.0);
        if c != x {
            clipped += 1;
        }
        c
    });

    Ok((Waveform::new(acc, sample_rate)?, clipped))
}

fn check_alignment(stems: &StemSet) -> Result<()> {
    let mut iter = stems.iter();
    let Some(first) = iter.next() else {
        return Ok(());
    };
    let reference = &first.waveform;

    for stem in iter {
        let w = &stem.waveform;
        if w.sample_rate() != reference.sample_rate() {
            return Err(StemError::StemAlignment(format!(
                "`{}` is {} Hz but `{}` is {} Hz",
                stem.name,
                w.sample_rate(),
                first.name,
                reference.sample_rate()
            )));
        }
        if w.channels() != reference.channels() {
            return Err(StemError::StemAlignment(format!(
                "`{}` has {} channels but `{}` has {}",
                stem.name,
                w.channels(),
                first.name,
                reference.channels()
            )));
        }
        if w.frames() != reference.frames() {
            return Err(StemError::StemAlignment(format!(
                "`{}` has {} frames but `{}` has {}",
                stem.name,
                w.frames(),
                first.name,
                reference.frames()
            )));
        }
    }
    Ok(())
}
