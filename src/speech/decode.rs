use hound::{SampleFormat, WavReader};
use std::path::Path;

use super::transcode::TARGET_SAMPLE_RATE;
use crate::error::AppError;

/// Reads a transcoded clip into mono samples in [-1, 1].
pub fn decode_wav(path: &Path) -> Result<Vec<f32>, AppError> {
    let reader = WavReader::open(path).map_err(|e| AppError::Decode(format!("open wav: {}", e)))?;

    let spec = reader.spec();
    if spec.channels != 1 || spec.sample_rate != TARGET_SAMPLE_RATE {
        return Err(AppError::Decode(format!(
            "expected mono {}Hz, got {} channel(s) at {}Hz",
            TARGET_SAMPLE_RATE, spec.channels, spec.sample_rate
        )));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AppError::Decode(format!(
            "expected 16-bit PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Decode(format!("read samples: {}", e)))?;

    if samples.is_empty() {
        return Err(AppError::Decode("clip contains no samples".to_string()));
    }
    Ok(samples)
}
