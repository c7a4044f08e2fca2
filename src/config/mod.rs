// config/mod.rs
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/config";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub serial: SerialSettings,
    pub speech: SpeechSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    /// Grace period granted to the device to echo `OK:<COMMAND>`.
    pub ack_timeout_ms: u64,
    /// Fail control requests whose acknowledgment does not arrive in time.
    pub require_ack: bool,
}

impl SerialSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechSettings {
    pub max_upload_bytes: usize,
    /// Path to a ggml whisper model. Voice commands are unavailable without it.
    pub model_path: Option<String>,
    pub language: Option<String>,
    pub threads: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(DEFAULT_CONFIG_PATH)
    }

    /// Defaults, then the optional file at `path`, then `APP_*` variables
    /// (`APP_SERIAL__PATH=/dev/ttyACM0`).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("server.address", "0.0.0.0:3000")?
            .set_default("serial.path", "/dev/ttyACM0")?
            .set_default("serial.baud_rate", 9600)?
            .set_default("serial.ack_timeout_ms", 100)?
            .set_default("serial.require_ack", false)?
            .set_default("speech.max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("speech.language", "en")?
            .set_default("speech.threads", 4)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9000)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }
}
