//! Error types and handling
//!
//! Common error types used across the compression pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-wide error type
///
/// Every kind is terminal: the pipeline never retries internally.
#[derive(Error, Debug)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata load timed out or the source could not be decoded
    #[error("Source load error: {0}")]
    SourceLoad(String),

    /// The asset's declared type is not a video
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// The host is missing a required decode or encode capability
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    /// No mutually supported output codec
    #[error("Encoding unsupported: {0}")]
    EncodingUnsupported(String),

    /// Operation cancelled by the caller
    #[error("Compression cancelled")]
    Cancelled,

    /// Encoder-reported internal failure
    #[error("Recording error: {0}")]
    Recording(String),
}

impl CompressError {
    /// Stable machine-readable code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            CompressError::Io(_) => "IO_ERROR",
            CompressError::SourceLoad(_) => "SOURCE_LOAD_ERROR",
            CompressError::UnsupportedInput(_) => "UNSUPPORTED_INPUT",
            CompressError::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            CompressError::EncodingUnsupported(_) => "ENCODING_UNSUPPORTED",
            CompressError::Cancelled => "CANCELLED",
            CompressError::Recording(_) => "RECORDING_ERROR",
        }
    }
}

/// Error response for callers that render messages
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<CompressError> for ErrorResponse {
    fn from(error: CompressError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using CompressError
pub type CompressResult<T> = Result<T, CompressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            CompressError::SourceLoad("x".into()),
            CompressError::UnsupportedInput("x".into()),
            CompressError::UnsupportedPlatform("x".into()),
            CompressError::EncodingUnsupported("x".into()),
            CompressError::Cancelled,
            CompressError::Recording("x".into()),
        ];
        let codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        let mut unique = codes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(codes.len(), unique.len());
    }

    #[test]
    fn test_error_response_mapping() {
        let response: ErrorResponse = CompressError::Cancelled.into();
        assert_eq!(response.code, "CANCELLED");
        assert_eq!(response.message, "Compression cancelled");
    }
}
