// handlers.rs

use crate::{
    commands::DeviceCommand,
    error::AppError,
    metrics::WS_CLIENTS,
    models::{
        AppState, ControlResponse, DeviceState, ErrorBody, HealthResponse, LedRequest, MotorRequest,
        SpeechResponse, parse_state,
    },
    utils,
};
use anyhow::Context;
use axum::{
    Json,
    extract::{
        FromRequest, Multipart, Request, State, WebSocketUpgrade,
        multipart::{MultipartError, MultipartRejection},
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use metrics::gauge;
use serde::de::DeserializeOwned;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use validator::Validate;

/// Multipart field carrying the voice clip.
pub const AUDIO_FIELD: &str = "audio";

/// JSON body that has passed `validator` checks. Both malformed JSON and
/// failed validation are rejected as [`AppError::Validation`].
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        value
            .validate()
            .map_err(|errors| AppError::Validation(utils::describe_validation_errors(&errors)))?;
        Ok(ValidatedJson(value))
    }
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let connected = state.store.snapshot().await.connected;
    Json(HealthResponse {
        status: "ok".to_string(),
        connected,
        path: state.serial_path.clone(),
    })
}

#[utoipa::path(
    get,
    path = "/api/status",
    responses((status = 200, description = "Current device state", body = DeviceState))
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<DeviceState> {
    Json(state.store.snapshot().await)
}

#[utoipa::path(
    post,
    path = "/api/motor",
    request_body = MotorRequest,
    responses(
        (status = 200, description = "Command written to the device", body = ControlResponse),
        (status = 400, description = "Invalid state", body = ErrorBody),
        (status = 500, description = "Serial link failure", body = ErrorBody)
    )
)]
pub async fn control_motor(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<MotorRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let switch =
        parse_state(req.state.as_deref()).map_err(|e| AppError::Validation(e.to_string()))?;

    let outcome = state.bridge.send(DeviceCommand::motor(switch)).await?;

    Ok(Json(ControlResponse {
        success: true,
        state: switch,
        acknowledged: outcome.acknowledged,
        brightness: None,
    }))
}

#[utoipa::path(
    post,
    path = "/api/led",
    request_body = LedRequest,
    responses(
        (status = 200, description = "Command written to the device", body = ControlResponse),
        (status = 400, description = "Invalid state or brightness", body = ErrorBody),
        (status = 500, description = "Serial link failure", body = ErrorBody)
    )
)]
pub async fn control_led(
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<LedRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    let switch =
        parse_state(req.state.as_deref()).map_err(|e| AppError::Validation(e.to_string()))?;
    let brightness = req
        .brightness
        .map(u8::try_from)
        .transpose()
        .map_err(|_| {
            AppError::Validation("Invalid brightness. Must be between 0 and 255".to_string())
        })?;

    let mut acknowledged = state.bridge.send(DeviceCommand::led(switch)).await?.acknowledged;
    if let Some(level) = brightness {
        acknowledged &= state
            .bridge
            .send(DeviceCommand::LedBrightness(level))
            .await?
            .acknowledged;
    }

    Ok(Json(ControlResponse {
        success: true,
        state: switch,
        acknowledged,
        brightness,
    }))
}

#[utoipa::path(
    post,
    path = "/api/speech",
    request_body(
        content_type = "multipart/form-data",
        description = "Audio clip in the `audio` field"
    ),
    responses(
        (status = 200, description = "Transcript and recognised command", body = SpeechResponse),
        (status = 400, description = "No audio file provided", body = ErrorBody),
        (status = 413, description = "Upload too large", body = ErrorBody),
        (status = 500, description = "Pipeline failure", body = ErrorBody)
    )
)]
pub async fn recognize_speech(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SpeechResponse>, AppError> {
    let multipart = multipart.map_err(|rejection| {
        debug!("Speech request without multipart body: {}", rejection.body_text());
        AppError::MissingUpload
    })?;

    // Dropping `workspace` removes the upload and every intermediate file.
    let workspace = state.speech.workspace()?;
    let upload = receive_upload(multipart, workspace.path(), state.max_upload_bytes).await?;
    let outcome = state.speech.run(&upload, workspace.path()).await?;

    Ok(Json(SpeechResponse {
        success: true,
        transcript: outcome.transcript,
        command: outcome.command,
    }))
}

/// Streams the `audio` field into `dir`, enforcing `limit` chunk by chunk.
async fn receive_upload(
    mut multipart: Multipart,
    dir: &Path,
    limit: usize,
) -> Result<PathBuf, AppError> {
    let upload_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::UploadTooLarge { limit }
        } else {
            AppError::Validation(e.body_text())
        }
    };

    while let Some(mut field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }

        let extension = field
            .file_name()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
            .to_ascii_lowercase();
        let path = dir.join(format!("upload.{}", extension));

        let mut file = tokio::fs::File::create(&path)
            .await
            .context("Failed to create upload file")?;
        let mut received = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(upload_error)? {
            received += chunk.len();
            if received > limit {
                return Err(AppError::UploadTooLarge { limit });
            }
            file.write_all(&chunk).await.context("Failed to store upload")?;
        }
        file.flush().await.context("Failed to store upload")?;

        if received == 0 {
            return Err(AppError::MissingUpload);
        }
        info!(bytes = received, %extension, "Audio upload received");
        return Ok(path);
    }

    Err(AppError::MissingUpload)
}

pub async fn handle_client_ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Client connection attempt");
    ws.on_upgrade(|socket| handle_client(socket, state))
}

async fn handle_client(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (client_id, mut rx) = match state.store.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!("Failed to subscribe client: {}", e);
            return;
        }
    };
    gauge!(WS_CLIENTS).set(state.store.subscribers() as f64);
    info!(%client_id, "Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    utils::cleanup_client_connection(client_id, &state.store);
}
