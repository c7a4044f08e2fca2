#![allow(dead_code)]

use async_trait::async_trait;
use device_bridge::{
    AppError, AppState,
    commands::Bridge,
    devices::DeviceStore,
    serial::{Connector, DeviceIo, SerialLink},
    speech::{SpeechPipeline, Transcriber},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    sync::mpsc,
};

pub const SERIAL_PATH: &str = "/dev/ttyTEST0";

/// Hands the far end of an in-memory pipe to the test for every open.
pub struct DuplexConnector {
    peers: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self, _path: &str, _baud_rate: u32) -> Result<Box<dyn DeviceIo>, AppError> {
        let (ours, theirs) = tokio::io::duplex(4096);
        self.peers
            .send(theirs)
            .map_err(|_| AppError::Connection("test device unplugged".into()))?;
        Ok(Box::new(ours))
    }
}

/// Transcriber returning a fixed transcript and counting calls.
pub struct CannedTranscriber {
    pub text: String,
    pub calls: AtomicUsize,
}

impl CannedTranscriber {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for CannedTranscriber {
    async fn transcribe(&self, samples: Vec<f32>) -> Result<String, AppError> {
        assert!(!samples.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

pub struct Options {
    pub ack_timeout: Duration,
    pub require_ack: bool,
    pub max_upload_bytes: usize,
    pub transcript: &'static str,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            require_ack: false,
            max_upload_bytes: 10 * 1024 * 1024,
            transcript: "please turn on the light",
        }
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<DeviceStore>,
    pub bridge: Arc<Bridge>,
    pub transcriber: Arc<CannedTranscriber>,
    pub scratch: TempDir,
    peers: mpsc::UnboundedReceiver<DuplexStream>,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let store = Arc::new(DeviceStore::new());
        let (tx, peers) = mpsc::unbounded_channel();
        let link = SerialLink::new(Box::new(DuplexConnector { peers: tx }), Arc::clone(&store));
        let bridge = Bridge::new(
            link,
            Arc::clone(&store),
            options.ack_timeout,
            options.require_ack,
        );

        let transcriber = CannedTranscriber::new(options.transcript);
        let scratch = tempfile::tempdir().unwrap();
        let speech = SpeechPipeline::new(transcriber.clone()).with_scratch_root(scratch.path());

        let state = Arc::new(AppState {
            store: Arc::clone(&store),
            bridge: Arc::clone(&bridge),
            speech,
            serial_path: SERIAL_PATH.to_string(),
            max_upload_bytes: options.max_upload_bytes,
        });

        Self {
            state,
            store,
            bridge,
            transcriber,
            scratch,
            peers,
        }
    }

    /// Opens the link and returns the device end of it.
    pub async fn connect(&mut self) -> DuplexStream {
        self.bridge.link().open(SERIAL_PATH, 9600).await.unwrap();
        self.peers.recv().await.unwrap()
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

/// Device that records each command and echoes `OK:<command>`.
pub fn acking_device(peer: DuplexStream) -> mpsc::UnboundedReceiver<String> {
    device(peer, true)
}

/// Device that records each command and never answers.
pub fn silent_device(peer: DuplexStream) -> mpsc::UnboundedReceiver<String> {
    device(peer, false)
}

fn device(peer: DuplexStream, ack: bool) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (reader, mut writer) = tokio::io::split(peer);
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if ack && writer.write_all(format!("OK:{line}\n").as_bytes()).await.is_err() {
                break;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub fn wav_bytes(rate: u32, seconds: f32) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (rate as f32 * seconds) as usize;
        for i in 0..frames {
            let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin();
            writer.write_sample((v * 6000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub const BOUNDARY: &str = "device-bridge-test-boundary";

/// Single-field multipart body.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}
