use std::time::Duration;

use thiserror::Error;

use crate::models::ByteRange;

/// Failure to obtain a byte range from the remote store.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The requested span cannot be expressed as an inclusive byte range.
    #[error("Invalid byte range: {0}")]
    InvalidRange(String),

    /// The object key does not exist in the bucket.
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// The store rejected the range (HTTP 416).
    #[error("Range {range} not satisfiable for {key}")]
    RangeNotSatisfiable { key: String, range: ByteRange },

    /// Any other non-success response or body read failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out (only possible when a timeout is configured).
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Returns true if the failure is likely transient (network or timeout).
    ///
    /// Nothing retries on this; it only classifies failures in logs.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::NetworkError(_) | FetchError::Timeout(_) => true,
            FetchError::HttpError(msg) => {
                msg.contains("HTTP 5") || msg.contains("HTTP 429") || msg.contains("reset")
            }
            _ => false,
        }
    }
}

/// Structurally invalid container bytes.
///
/// Truncation is not a decode error: a span that ends mid-record simply
/// yields fewer captures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Bad record magic at offset {offset}")]
    BadMagic { offset: usize },

    #[error("Malformed record header at offset {offset}: {reason}")]
    MalformedHeader { offset: usize, reason: String },

    #[error("Missing Content-Length in record at offset {offset}")]
    MissingContentLength { offset: usize },

    #[error("Invalid Content-Length '{value}' in record at offset {offset}")]
    InvalidContentLength { offset: usize, value: String },

    #[error("Corrupt gzip stream: {0}")]
    Gzip(String),
}

/// HTML-to-text failure. Always recovered inside the text extractor and
/// turned into an empty string; never surfaced through [`AppError`].
#[derive(Error, Debug)]
pub enum ExtractionFailure {
    #[error("HTML extraction panicked: {0}")]
    Panicked(String),
}

/// Errors that leave the pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A record reference could not be parsed or violates `length > 0`.
    #[error("Invalid record reference: {0}")]
    InvalidReference(String),

    /// Configuration value is missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Returns true if this error is likely transient.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Fetch(e) => e.is_transient(),
            _ => false,
        }
    }
}
