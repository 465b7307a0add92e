//! Error types for the visual analysis pipeline
//!
//! Stage-local failures ([`RenderError`], [`QuantizationError`],
//! [`SaliencyError`]) are values the orchestrator records against a job.
//! Only [`Error`] ever escapes a corpus run.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for corpus-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Corpus-level errors. Anything surfacing as this type aborts the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A render worker could not be started
    #[error("Worker allocation failed: {0}")]
    WorkerError(String),

    /// Failed to write an output artifact
    #[error("Cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to encode or persist an output (table, image, document)
    #[error("Output failed: {0}")]
    OutputError(String),

    /// Failed to read run input (URL list, metadata)
    #[error("Input failed: {0}")]
    InputError(String),

    /// A job was driven through an illegal status change
    #[error("Invalid job state: {0}")]
    StateError(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::OutputError(format!("CSV: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Error::OutputError(format!("spreadsheet: {}", err))
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::OutputError(format!("image: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::OutputError(format!("JSON: {}", err))
    }
}

/// Transport-level failures. Always worth another attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("network timeout after {0}ms")]
    Timeout(u64),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("network error: {0}")]
    Other(String),
}

/// Failures of a single capture
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The page did not settle before the deadline
    #[error("render timeout after {0}ms")]
    Timeout(u64),

    #[error("navigation failed: {0}")]
    NavigationFailure(String),

    #[error("script failure: {0}")]
    ScriptFailure(String),

    /// Nothing capturable (zero area or undecodable capture)
    #[error("blank page: {0}")]
    BlankPage(String),

    #[error("malformed URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The server rejected the request but the backend does not expose the code
    #[error("HTTP error: {0}")]
    HttpRejected(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("cancelled")]
    Cancelled,

    /// The render context could not be created
    #[error("renderer initialization failed: {0}")]
    Init(String),

    /// The renderer panicked while capturing this page
    #[error("renderer crashed: {0}")]
    Crashed(String),
}

impl RenderError {
    /// Whether the orchestrator should try the same URL again.
    pub fn is_transient(&self) -> bool {
        match self {
            RenderError::Timeout(_) | RenderError::NavigationFailure(_) | RenderError::Network(_) => true,
            RenderError::HttpStatus(code) => *code == 408 || *code == 429 || *code >= 500,
            RenderError::ScriptFailure(_)
            | RenderError::BlankPage(_)
            | RenderError::InvalidUrl(_)
            | RenderError::HttpRejected(_)
            | RenderError::Cancelled
            | RenderError::Init(_)
            | RenderError::Crashed(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantizationError {
    #[error("image has no pixels to sample")]
    EmptyImage,

    #[error("cluster count must be at least 1 (got {0})")]
    InvalidClusterCount(usize),

    #[error("quantization timed out after {0}ms")]
    Timeout(u64),

    #[error("quantization failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaliencyError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("saliency timed out after {0}ms")]
    Timeout(u64),

    #[error("saliency failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RenderError::Timeout(10).is_transient());
        assert!(RenderError::Network(NetworkError::Dns("x".into())).is_transient());
        assert!(RenderError::HttpStatus(503).is_transient());
        assert!(RenderError::HttpStatus(429).is_transient());
        assert!(!RenderError::HttpStatus(404).is_transient());
        assert!(!RenderError::InvalidUrl("nope".into()).is_transient());
        assert!(!RenderError::Cancelled.is_transient());
        assert!(!RenderError::Crashed("overflow".into()).is_transient());
    }

    #[test]
    fn network_timeout_reads_as_such() {
        let err = RenderError::from(NetworkError::Timeout(1500));
        assert_eq!(err.to_string(), "network timeout after 1500ms");
    }
}
