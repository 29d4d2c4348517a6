// Error handling module
// Defines the error taxonomy surfaced by the benchmark library

use thiserror::Error;

/// Errors that can cross the library boundary.
///
/// Per-request failures (connection refused, timeouts, resets, upstream
/// status codes) are produced internally but are converted into failed
/// samples by the runner; only configuration and sink errors reach callers.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid run configuration, detected before any worker starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// Prompt corpus could not be loaded or was empty
    #[error("Prompt corpus error: {0}")]
    Corpus(String),

    /// Connection, timeout or body-stream failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Generation endpoint answered with a non-success status
    #[error("Upstream error: {status} - {message}")]
    UpstreamStatus { status: u16, message: String },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sample file could not be written or read
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BenchError {
    /// Render the error with its full source chain.
    ///
    /// `reqwest` keeps the interesting part ("connection refused",
    /// "operation timed out") in the source chain, so the top-level
    /// message alone is not enough for a sample's error column.
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            source = std::error::Error::source(err);
        }
        message
    }
}

/// Result type alias for benchmark operations
pub type Result<T> = std::result::Result<T, BenchError>;
