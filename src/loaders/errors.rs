//! Document loader errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// A local file or directory could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk directory {path}: {reason}")]
    Walk { path: String, reason: String },

    #[error("failed to parse PDF {path}: {reason}")]
    Pdf { path: String, reason: String },

    /// A directory contains a file with no registered loader.
    #[error("no loader registered for {path}")]
    UnsupportedExtension { path: String },

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// The request never produced a response.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Non-2xx response.
    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus { url: String, status: u16, body: String },

    /// A response arrived but could not be interpreted.
    #[error("unexpected response from {url}: {reason}")]
    UnexpectedResponse { url: String, reason: String },

    /// A blocking parse task panicked or was cancelled.
    #[error("loader task failed: {reason}")]
    Task { reason: String },
}

impl LoaderError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        LoaderError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
