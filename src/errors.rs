use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::{
    models::upload::ChunkAck,
    services::{file_service::FileError, upload_service::UploadError},
};

/// How an error body is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    /// `{"error": ..., "status": ...}`
    Json,
    /// Bare `text/plain` message.
    Plain,
    /// `{"success": false, "message": ..., "error": ...}` as the chunk endpoint answers.
    ChunkAck,
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Underlying cause, surfaced only by the `ChunkAck` format.
    pub detail: Option<String>,
    pub format: ErrorFormat,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
            format: ErrorFormat::Json,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn plain(mut self) -> Self {
        self.format = ErrorFormat::Plain;
        self
    }

    /// Render in the chunk acknowledgement shape. Server errors keep the
    /// generic message and move the cause into `error`.
    pub fn as_chunk_ack(mut self) -> Self {
        if self.status.is_server_error() && self.detail.is_none() {
            self.detail = Some(std::mem::replace(
                &mut self.message,
                "Chunk upload failed".into(),
            ));
        }
        self.format = ErrorFormat::ChunkAck;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.format {
            ErrorFormat::Json => {
                let body = Json(json!({
                    "error": self.message,
                    "status": self.status.as_u16()
                }));
                (self.status, body).into_response()
            }
            ErrorFormat::Plain => (self.status, self.message).into_response(),
            ErrorFormat::ChunkAck => {
                let body = Json(ChunkAck {
                    success: false,
                    message: self.message,
                    error: self.detail,
                });
                (self.status, body).into_response()
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::InvalidStagingKey(_) | UploadError::NoFragments => {
                StatusCode::BAD_REQUEST
            }
            UploadError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            UploadError::Incomplete { .. } => StatusCode::CONFLICT,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Io(_) | UploadError::File(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "upload storage failure");
        }
        AppError::new(status, err.to_string())
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound(id) => AppError::not_found(format!("file `{}` not found", id)),
            FileError::InvalidId => AppError::bad_request("invalid file id"),
            other => {
                tracing::error!(error = %other, "file registry failure");
                AppError::internal(other.to_string())
            }
        }
    }
}
