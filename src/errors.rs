use crate::services::{proxy::ProxyError, stream_service::StreamError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
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
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Upstream detail stays in the logs; clients only see the category.
impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidWatchPath(_) => AppError::bad_request("Invalid path format"),
            StreamError::NotFound(_) => AppError::not_found("File not found"),
            StreamError::InvalidFingerprint { .. } => {
                AppError::new(StatusCode::FORBIDDEN, "Invalid file hash provided")
            }
            StreamError::MalformedRange(_) => AppError::bad_request("Malformed Range header"),
            StreamError::InvalidRange { .. } => AppError::bad_request("Invalid Range header"),
            StreamError::TransientUpstream(_)
            | StreamError::Timeout(_)
            | StreamError::UpstreamExhausted { .. }
            | StreamError::NoUpstream => {
                AppError::internal("An internal streaming error occurred")
            }
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::NotConfigured => AppError::not_found("Not found"),
            ProxyError::FallbackFailed { .. } => {
                AppError::internal("An error occurred during proxy processing fallback")
            }
        }
    }
}
