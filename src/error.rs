use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Missing Content-Type header")]
    MissingContentType,

    #[error("Content-Type must be audio/ogg")]
    InvalidContentType(String),

    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid Content-Length header")]
    InvalidContentLength(String),

    #[error("Missing request body")]
    EmptyBody,

    #[error("Content-Length too large")]
    PayloadTooLarge { limit: u64 },

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Failed to start transcoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder exited with {status}: {stderr}")]
    TranscodeFailed { status: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingContentType
            | GatewayError::InvalidContentType(_)
            | GatewayError::MissingContentLength
            | GatewayError::InvalidContentLength(_)
            | GatewayError::EmptyBody
            | GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Spawn { .. }
            | GatewayError::TranscodeFailed { .. }
            | GatewayError::Io(_)
            | GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used as a metrics key
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::MissingContentType => "missing_content_type",
            GatewayError::InvalidContentType(_) => "invalid_content_type",
            GatewayError::MissingContentLength => "missing_content_length",
            GatewayError::InvalidContentLength(_) => "invalid_content_length",
            GatewayError::EmptyBody => "empty_body",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::BodyRead(_) => "body_read",
            GatewayError::Spawn { .. } => "spawn",
            GatewayError::TranscodeFailed { .. } => "transcode_failed",
            GatewayError::Io(_) => "io",
            GatewayError::Config(_) => "config",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status.is_server_error() {
            tracing::error!("{}", self);
            match self {
                GatewayError::TranscodeFailed { .. } => "Transcoding failed".to_string(),
                _ => "Internal Server Error".to_string(),
            }
        } else {
            self.to_string()
        };

        (status, body).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, GatewayError>;
