use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{config::SpeechSettings, error::AppError};

/// Speech-to-text model: 16 kHz mono samples in, raw transcript out.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, samples: Vec<f32>) -> Result<String, AppError>;
}

/// Used when no model is configured; every request fails.
pub struct UnavailableTranscriber {
    reason: String,
}

impl UnavailableTranscriber {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(&self, _samples: Vec<f32>) -> Result<String, AppError> {
        Err(AppError::Transcription(self.reason.clone()))
    }
}

/// Builds the transcriber described by `settings`.
pub fn from_settings(settings: &SpeechSettings) -> anyhow::Result<Arc<dyn Transcriber>> {
    let Some(model_path) = settings.model_path.as_deref() else {
        warn!("No speech model configured, voice commands disabled");
        return Ok(Arc::new(UnavailableTranscriber::new(
            "no speech model configured (speech.model_path)",
        )));
    };

    load_model(model_path, settings)
}

#[cfg(feature = "whisper")]
fn load_model(model_path: &str, settings: &SpeechSettings) -> anyhow::Result<Arc<dyn Transcriber>> {
    let engine = whisper::WhisperTranscriber::load(
        model_path,
        settings.language.clone(),
        settings.threads,
    )?;
    info!(%model_path, "Whisper model loaded");
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "whisper"))]
fn load_model(
    model_path: &str,
    _settings: &SpeechSettings,
) -> anyhow::Result<Arc<dyn Transcriber>> {
    warn!(%model_path, "Built without the `whisper` feature, voice commands disabled");
    info!("Rebuild with `--features whisper` to enable transcription");
    Ok(Arc::new(UnavailableTranscriber::new(
        "speech support not compiled in (enable the `whisper` feature)",
    )))
}

#[cfg(feature = "whisper")]
pub mod whisper {
    use super::*;
    use anyhow::Context;
    use tokio::sync::Mutex;
    use tracing::debug;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// whisper.cpp via `whisper-rs`. Inference is serialised: the model
    /// cannot usefully run two clips at once.
    pub struct WhisperTranscriber {
        context: Arc<WhisperContext>,
        language: Option<String>,
        threads: i32,
        slot: Mutex<()>,
    }

    impl WhisperTranscriber {
        pub fn load(
            model_path: &str,
            language: Option<String>,
            threads: i32,
        ) -> anyhow::Result<Self> {
            if !std::path::Path::new(model_path).exists() {
                anyhow::bail!("Model file not found: {}", model_path);
            }
            let context =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| anyhow::anyhow!("{:?}", e))
                .with_context(|| format!("Failed to load Whisper model {}", model_path))?;

            Ok(Self {
                context: Arc::new(context),
                language,
                threads,
                slot: Mutex::new(()),
            })
        }
    }

    #[async_trait]
    impl Transcriber for WhisperTranscriber {
        async fn transcribe(&self, samples: Vec<f32>) -> Result<String, AppError> {
            let _slot = self.slot.lock().await;
            let context = Arc::clone(&self.context);
            let language = self.language.clone();
            let threads = self.threads;

            tokio::task::spawn_blocking(move || -> Result<String, AppError> {
                let failed =
                    |e: whisper_rs::WhisperError| AppError::Transcription(format!("{:?}", e));

                let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
                params.set_n_threads(threads);
                params.set_translate(false);
                params.set_print_special(false);
                params.set_print_progress(false);
                params.set_print_realtime(false);
                params.set_print_timestamps(false);
                params.set_language(language.as_deref());

                let mut state = context.create_state().map_err(failed)?;
                state.full(params, &samples).map_err(failed)?;

                let segments = state.full_n_segments().map_err(failed)?;
                let mut text = String::new();
                for i in 0..segments {
                    text.push_str(&state.full_get_segment_text(i).map_err(failed)?);
                }
                debug!(segments, "Whisper transcription finished");
                Ok(text.trim().to_string())
            })
            .await
            .map_err(|e| AppError::Transcription(format!("transcription task failed: {}", e)))?
        }
    }
}
