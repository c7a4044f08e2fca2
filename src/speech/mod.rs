//! Voice command pipeline: upload → transcode → decode → transcribe →
//! clean → keyword match.

pub mod decode;
pub mod filters;
pub mod keywords;
pub mod transcode;
pub mod transcriber;

use anyhow::Context;
use metrics::counter;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tempfile::TempDir;
use tracing::{debug, info};

use crate::{error::AppError, metrics::SPEECH_REQUESTS_TOTAL, models::Switch};
use filters::VoiceFilterConfig;
pub use transcriber::Transcriber;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechOutcome {
    pub transcript: String,
    pub command: Option<Switch>,
}

pub struct SpeechPipeline {
    transcriber: Arc<dyn Transcriber>,
    filters: VoiceFilterConfig,
    scratch_root: Option<PathBuf>,
}

impl SpeechPipeline {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            filters: VoiceFilterConfig::default(),
            scratch_root: None,
        }
    }

    /// Creates per-request scratch directories under `root` instead of the
    /// system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_filters(mut self, filters: VoiceFilterConfig) -> Self {
        self.filters = filters;
        self
    }

    /// Scratch directory for one request. Everything inside is deleted when
    /// the returned guard drops, whichever way the request ends.
    pub fn workspace(&self) -> Result<TempDir, AppError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("speech-");
        let dir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        Ok(dir.context("Failed to create scratch directory")?)
    }

    /// Runs the full pipeline on an uploaded clip stored inside `workspace`.
    pub async fn run(&self, upload: &Path, workspace: &Path) -> Result<SpeechOutcome, AppError> {
        counter!(SPEECH_REQUESTS_TOTAL).increment(1);
        let started = Instant::now();

        let input = upload.to_path_buf();
        let transcoded = workspace.join("transcoded.wav");
        let filters = self.filters.clone();
        let samples = tokio::task::spawn_blocking(move || {
            let report = transcode::transcode(&input, &transcoded, &filters)?;
            debug!(?report, "Transcode finished");
            decode::decode_wav(&transcoded)
        })
        .await
        .context("Audio worker panicked")??;

        let raw = self.transcriber.transcribe(samples).await?;
        let outcome = Self::interpret(&raw);

        info!(
            raw = %raw,
            transcript = %outcome.transcript,
            command = ?outcome.command,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Voice command processed"
        );
        Ok(outcome)
    }

    /// Clean-up and keyword stages on a raw transcript.
    pub fn interpret(raw: &str) -> SpeechOutcome {
        let transcript = keywords::clean_transcript(raw);
        if transcript.is_empty() {
            return SpeechOutcome {
                transcript,
                command: None,
            };
        }
        let command = keywords::extract_command(&transcript);
        SpeechOutcome { transcript, command }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::sync::Mutex;
    use transcriber::UnavailableTranscriber;

    struct Canned {
        text: &'static str,
        seen: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl Transcriber for Canned {
        async fn transcribe(&self, samples: Vec<f32>) -> Result<String, AppError> {
            assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
            *self.seen.lock().unwrap() = Some(samples.len());
            Ok(self.text.to_string())
        }
    }

    fn tone(path: &Path, rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..rate / 2 {
            let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin();
            writer.write_sample((v * 8000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn interpret_maps_transcripts_to_commands() {
        assert_eq!(
            SpeechPipeline::interpret("Please turn on the light."),
            SpeechOutcome {
                transcript: "please turn on the light.".into(),
                command: Some(Switch::On)
            }
        );
        assert_eq!(
            SpeechPipeline::interpret("turn it off now").command,
            Some(Switch::Off)
        );
        assert_eq!(
            SpeechPipeline::interpret("(music) (applause)"),
            SpeechOutcome {
                transcript: String::new(),
                command: None
            }
        );
        assert_eq!(SpeechPipeline::interpret("on or off?").command, None);
    }

    #[tokio::test]
    async fn run_feeds_16k_samples_to_the_model() {
        let canned = Arc::new(Canned {
            text: " Drinker on.",
            seen: Mutex::new(None),
        });
        let pipeline = SpeechPipeline::new(canned.clone());
        let workspace = pipeline.workspace().unwrap();
        let upload = workspace.path().join("upload.wav");
        tone(&upload, 48_000);

        let outcome = pipeline.run(&upload, workspace.path()).await.unwrap();
        assert_eq!(outcome.transcript, "drinker on.");
        assert_eq!(outcome.command, Some(Switch::On));
        assert_eq!(*canned.seen.lock().unwrap(), Some(8_000));
    }

    #[tokio::test]
    async fn identical_clips_give_identical_results() {
        let pipeline = SpeechPipeline::new(Arc::new(Canned {
            text: "[MUSIC] turn it off",
            seen: Mutex::new(None),
        }));
        let workspace = pipeline.workspace().unwrap();
        let upload = workspace.path().join("upload.wav");
        tone(&upload, 16_000);

        let first = pipeline.run(&upload, workspace.path()).await.unwrap();
        let second = pipeline.run(&upload, workspace.path()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.command, Some(Switch::Off));
    }

    #[tokio::test]
    async fn missing_model_is_a_transcription_error() {
        let pipeline = SpeechPipeline::new(Arc::new(UnavailableTranscriber::new("no model")));
        let workspace = pipeline.workspace().unwrap();
        let upload = workspace.path().join("upload.wav");
        tone(&upload, 16_000);

        assert!(matches!(
            pipeline.run(&upload, workspace.path()).await,
            Err(AppError::Transcription(_))
        ));
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = SpeechPipeline::new(Arc::new(UnavailableTranscriber::new("x")))
            .with_scratch_root(root.path());

        let workspace = pipeline.workspace().unwrap();
        std::fs::write(workspace.path().join("upload.m4a"), b"partial").unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);

        drop(workspace);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
