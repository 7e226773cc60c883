//! Error types for bioproxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for bioproxy
pub type Result<T> = std::result::Result<T, Error>;

/// bioproxy errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (malformed JSON, invalid bind address, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backend could not be reached at all (connect/transport failure)
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The backend responded with an unexpected, non-2xx status
    #[error("Backend returned status {status}: {body}")]
    BackendStatusError {
        /// HTTP status returned by the backend
        status: u16,
        /// Response body, truncated for logging
        body: String,
    },

    /// A configured template's file does not exist
    #[error("Template file not found: {0}")]
    TemplateMissing(String),

    /// A template directive's target file could not be read. Non-fatal: the
    /// directive is replaced with an inline marker and expansion continues.
    #[error("Failed to read '{path}': {reason}")]
    TemplateReadError {
        /// Path that could not be read
        path: String,
        /// Underlying IO failure, stringified
        reason: String,
    },

    /// Template expansion failed in a way that aborts the request (fatal)
    #[error("Template processing failed: {0}")]
    TemplateProcessError(String),

    /// The inbound request body was malformed or missing required fields
    #[error("Malformed request: {0}")]
    RequestMalformed(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestMalformed(_) => StatusCode::BAD_REQUEST,
            Self::TemplateProcessError(_) | Self::TemplateMissing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::BackendStatusError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Renders an `Error` as the HTTP response sent back to the client that
/// triggered it (per the propagation policy: 400 for malformed input, 500
/// for template-processing failures, 502 when the backend is unreachable).
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_string();
        (status, body).into_response()
    }
}
