// error.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ErrorBody;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Serial connection error: {0}")]
    Connection(String),
    #[error("Serial port not connected")]
    NotConnected,
    #[error("Device did not acknowledge {0}")]
    AckTimeout(String),
    #[error("{0}")]
    Validation(String),
    #[error("No audio file provided")]
    MissingUpload,
    #[error("Audio upload exceeds the {limit} byte limit")]
    UploadTooLarge { limit: usize },
    #[error("Audio transcoding failed: {0}")]
    Transcode(String),
    #[error("Audio decoding failed: {0}")]
    Decode(String),
    #[error("Transcription failed: {0}")]
    Transcription(String),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MissingUpload => StatusCode::BAD_REQUEST,
            AppError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::AckTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Connection(_)
            | AppError::NotConnected
            | AppError::Transcode(_)
            | AppError::Decode(_)
            | AppError::Transcription(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, "Request failed");
        } else {
            warn!(error = %self, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
