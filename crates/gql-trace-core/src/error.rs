//! Error types for trace capture
//!
//! Capture itself never fails mid-execution: hooks record diagnostics instead
//! of returning errors. These errors surface at setup time (attaching a module)
//! and when encoding, decoding or writing a finished trace.

use thiserror::Error;

/// Main error type for capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The crate was built without the `protobuf` feature
    #[error("Perfetto capture is unavailable: gql-trace-core was built without the `protobuf` feature. Enable it, then try again.")]
    ProtobufUnavailable,

    /// Encoding the packet buffer failed
    #[error("Encode error: {0}")]
    Encode(String),

    /// Decoding a binary trace failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid setup or options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing trace output failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Debug JSON rendering failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CaptureError::Config(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        CaptureError::Decode(msg.into())
    }

    /// Whether this error is raised when attaching a module rather than at output time
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            CaptureError::ProtobufUnavailable | CaptureError::Config(_)
        )
    }
}

/// Result type alias for capture operations
pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
