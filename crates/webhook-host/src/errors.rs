//! Error types for the webhook host

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::path::PathBuf;
use tracing::warn;

/// Error returned by a subscriber callback.
///
/// Subscribers are application code, so any error type is accepted. The host
/// only logs it together with the request's correlation id.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors raised while loading the TLS certificate bundle
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read certificate file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Certificate file {path} is not valid PEM: {message}")]
    InvalidPem { path: PathBuf, message: String },

    #[error("Certificate file {path} contains no certificate")]
    NoCertificate { path: PathBuf },

    #[error("Certificate file {path} contains no private key")]
    NoPrivateKey { path: PathBuf },

    #[error("Certificate file {path} contains more than one private key")]
    MultiplePrivateKeys { path: PathBuf },

    #[error("Private key in {path} is encrypted but no passphrase was configured")]
    PassphraseRequired { path: PathBuf },

    #[error("Failed to decrypt private key in {path}: {message}")]
    Decrypt { path: PathBuf, message: String },

    #[error("TLS configuration rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// Server lifecycle errors
///
/// Construction errors (`Configuration`, `Tls`, `BindFailed`) are fatal: the
/// server never reaches a runnable state.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server is already receiving")]
    AlreadyStarted,

    #[error("Server has not been started")]
    NotStarted,

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

/// Failure recorded for a single subscriber invocation.
///
/// Dispatch logs each of these once; they are returned in the
/// [`DispatchReport`](crate::subscriber::DispatchReport) for inspection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Subscriber #{index} ({subscriber}) failed: {message}")]
    SubscriberFailed {
        index: usize,
        subscriber: String,
        message: String,
    },

    #[error("Subscriber #{index} ({subscriber}) panicked: {message}")]
    SubscriberPanicked {
        index: usize,
        subscriber: String,
        message: String,
    },

    #[error("Dispatch task was cancelled: {message}")]
    Cancelled { message: String },
}

/// Rejections produced by the host itself, before any subscriber runs
///
/// - `411 Length Required`: POST without `Content-Length` while the host is
///   configured to require it
/// - `413 Payload Too Large`: declared or streamed body exceeds
///   `server.max_body_size`
/// - `400 Bad Request`: the body stream failed mid-read
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Content-Length header is required")]
    LengthRequired,

    #[error("Payload too large: {size} bytes (max: {max_size} bytes)")]
    PayloadTooLarge { size: u64, max_size: usize },

    #[error("Request body exceeds maximum size of {max_size} bytes")]
    BodyTooLarge { max_size: usize },

    #[error("Failed to read request body: {message}")]
    BodyRead { message: String },
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::PayloadTooLarge { .. } | Self::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::BodyRead { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::PayloadTooLarge { size, max_size } => {
                warn!(payload_size = size, max_size = max_size, "Payload too large");
            }
            Self::BodyTooLarge { max_size } => {
                warn!(max_size = max_size, "Streamed body exceeded size limit");
            }
            Self::LengthRequired => warn!("Rejected POST without Content-Length"),
            Self::BodyRead { message } => warn!(error = %message, "Request body read failed"),
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;
