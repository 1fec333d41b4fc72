use std::{fs::File, path::Path};

use hound::{SampleFormat, WavSpec, WavWriter};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use crate::{
    error::{Result, StemError},
    types::{OutputEncoding, Waveform},
};

fn decode_err(path: &Path, e: impl std::fmt::Display) -> StemError {
    StemError::Decode(format!("{}: {e}", path.display()))
}

/// Decodes any container/codec symphonia knows into a planar waveform.
pub fn read_audio<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let path: &Path = path.as_ref();

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| decode_err(path, e))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| decode_err(path, "no default track found"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(path, e))?;

    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(decode_err(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                warn!(path = %path.display(), %msg, "skipping corrupt packet");
                continue;
            }
            Err(e) => return Err(decode_err(path, e)),
        };

        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    if interleaved.is_empty() || channels == 0 {
        return Err(decode_err(path, "no audio frames decoded"));
    }

    let waveform = Waveform::from_interleaved(&interleaved, channels, sample_rate)?;
    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = waveform.frames(),
        "read audio"
    );
    Ok(waveform)
}

/// Writes a waveform as WAV. PCM output is clamped to the representable range.
pub fn write_audio<P: AsRef<Path>>(
    path: P,
    waveform: &Waveform,
    encoding: OutputEncoding,
) -> Result<()> {
    let spec = WavSpec {
        channels: waveform.channels() as u16,
        sample_rate: waveform.sample_rate(),
        bits_per_sample: match encoding {
            OutputEncoding::Pcm16 => 16,
            OutputEncoding::Float32 => 32,
        },
        sample_format: match encoding {
            OutputEncoding::Pcm16 => SampleFormat::Int,
            OutputEncoding::Float32 => SampleFormat::Float,
        },
    };

    let mut writer = WavWriter::create(path.as_ref(), spec)?;
    for frame in waveform.samples().columns() {
        for &sample in frame {
            match encoding {
                OutputEncoding::Pcm16 => {
                    let s = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32);
                    writer.write_sample(s as i16)?;
                }
                OutputEncoding::Float32 => writer.write_sample(sample)?,
            }
        }
    }

    writer.finalize()?;
    Ok(())
}
