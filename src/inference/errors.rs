//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to a chat-completion endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The configured base URL cannot be turned into a request URL.
    #[error("invalid endpoint '{base_url}': {reason}")]
    InvalidEndpoint { base_url: String, reason: String },

    /// SSE stream parsing, chunk-level or response-body error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// Every attempt allowed by the retry budget failed.
    #[error("all {attempts} attempts failed, last error: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<InferenceError>,
    },
}

impl InferenceError {
    /// Whether a fresh attempt against the same endpoint could succeed.
    ///
    /// 408/409/429 and 5xx mirror what OpenAI-compatible servers use for
    /// transient conditions. Endpoint and config errors never heal by retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError {
                    status: 408 | 409 | 429 | 500..=599,
                    ..
                }
        )
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}
