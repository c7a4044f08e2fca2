use hound::{SampleFormat, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::{fs::File, io::ErrorKind, path::Path};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, Packet},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use super::filters::{VoiceFilterConfig, apply_voice_chain};
use crate::error::AppError;

pub const TARGET_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranscodeReport {
    pub source_rate: u32,
    pub source_channels: usize,
    pub samples: usize,
}

/// Input frames handed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Converts any container/codec symphonia can read into a filtered
/// 16 kHz mono 16-bit PCM WAV at `output`.
pub fn transcode(
    input: &Path,
    output: &Path,
    filters: &VoiceFilterConfig,
) -> Result<TranscodeReport, AppError> {
    let decoded = MonoTrack::open(input)?.read_to_end()?;

    let mut samples = if decoded.rate == TARGET_SAMPLE_RATE {
        decoded.samples
    } else {
        resample(&decoded.samples, decoded.rate)?
    };
    apply_voice_chain(&mut samples, TARGET_SAMPLE_RATE, filters);
    write_wav(output, &samples)?;

    debug!(
        source_rate = decoded.rate,
        source_channels = decoded.channels,
        samples = samples.len(),
        "Upload transcoded to 16 kHz mono"
    );

    Ok(TranscodeReport {
        source_rate: decoded.rate,
        source_channels: decoded.channels,
        samples: samples.len(),
    })
}

struct Downmixed {
    samples: Vec<f32>,
    rate: u32,
    channels: usize,
}

/// The default track of an uploaded file, opened for decoding.
struct MonoTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    rate: Option<u32>,
}

impl MonoTrack {
    fn open(input: &Path) -> Result<Self, AppError> {
        let file = File::open(input)
            .map_err(|e| AppError::Transcode(format!("open upload: {}", e)))?;
        let source = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = input.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AppError::Transcode(format!("unrecognised audio format: {}", e)))?
            .format;

        let track = format
            .default_track()
            .ok_or_else(|| AppError::Transcode("no audio track found".to_string()))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AppError::Transcode(format!("unsupported codec: {}", e)))?;

        Ok(Self {
            track_id: track.id,
            rate: track.codec_params.sample_rate,
            format,
            decoder,
        })
    }

    /// Decodes every packet of the track, averaging channels as it goes.
    fn read_to_end(mut self) -> Result<Downmixed, AppError> {
        let mut samples = Vec::new();
        let mut channels = 0;

        while let Some(packet) = self.next_packet()? {
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(error = %e, "Dropping undecodable audio frame");
                    continue;
                }
                Err(e) => return Err(AppError::Transcode(format!("decode: {}", e))),
            };
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            let spec = *decoded.spec();
            self.rate.get_or_insert(spec.rate);
            channels = spec.channels.count().max(1);

            let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
            buffer.copy_planar_ref(decoded);

            // Planar layout: `frames` samples of channel 0, then channel 1, ...
            let planes = buffer.samples();
            let scale = 1.0 / channels as f32;
            samples.extend((0..frames).map(|i| {
                (0..channels).map(|ch| planes[ch * frames + i]).sum::<f32>() * scale
            }));
        }

        if samples.is_empty() {
            return Err(AppError::Transcode("no audio samples decoded".to_string()));
        }
        let rate = self
            .rate
            .ok_or_else(|| AppError::Transcode("unknown sample rate".to_string()))?;

        Ok(Downmixed {
            samples,
            rate,
            channels,
        })
    }

    /// Next packet of our track; `None` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, AppError> {
        loop {
            match self.format.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => return Err(AppError::Transcode(format!("read packet: {}", e))),
            }
        }
    }
}

/// Resamples mono `samples` from `from_rate` to [`TARGET_SAMPLE_RATE`].
///
/// The resampler's leading delay is dropped and its tail is flushed, so the
/// output is time-aligned with the input and `round(len * ratio)` long.
fn resample(samples: &[f32], from_rate: u32) -> Result<Vec<f32>, AppError> {
    let resample_error =
        |e: &dyn std::fmt::Display| AppError::Transcode(format!("resample: {}", e));

    let ratio = TARGET_SAMPLE_RATE as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| resample_error(&e))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut rest = samples;
    while rest.len() >= resampler.input_frames_next() {
        let (chunk, tail) = rest.split_at(resampler.input_frames_next());
        let block = resampler.process(&[chunk], None).map_err(|e| resample_error(&e))?;
        output.extend_from_slice(&block[0]);
        rest = tail;
    }

    let mut remainder = Some(rest);
    while output.len() < expected + delay {
        let block = match remainder.take() {
            Some(tail) => resampler.process_partial(Some(&[tail][..]), None),
            None => resampler.process_partial::<&[f32]>(None, None),
        }
        .map_err(|e| resample_error(&e))?;
        output.extend_from_slice(&block[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

fn write_wav(path: &Path, samples: &[f32]) -> Result<(), AppError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let wav_error = |e: hound::Error| AppError::Transcode(format!("write wav: {}", e));
    let mut writer = WavWriter::create(path, spec).map_err(wav_error)?;
    for s in samples {
        let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(pcm).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)
}
