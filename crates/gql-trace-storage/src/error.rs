//! Error types for trace storage
//!
//! Store backends return these errors; the [`DetailedTrace`](crate::DetailedTrace)
//! facade turns them into logged, non-fatal conditions so they never reach
//! the traced request.

use thiserror::Error;

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Embedded database failure
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    /// A record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File access or I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stored record is inconsistent
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The backend cannot be reached right now
    #[error("Trace store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        StoreError::Config(msg.into())
    }

    /// Create a corrupt-record error
    pub fn corrupt(key: impl ToString, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StoreError::Unavailable(msg.into())
    }

    /// Whether retrying later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Unavailable(_) | StoreError::Sled(sled::Error::Io(_))
        )
    }

    /// Check if this is a user-facing error (vs internal)
    pub fn is_user_error(&self) -> bool {
        matches!(self, StoreError::Config(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Config(format!("TOML error: {}", err))
    }
}

/// Result type alias for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::corrupt(7, "missing payload");
        assert_eq!(err.to_string(), "Corrupt record 7: missing payload");
    }

    #[test]
    fn test_is_transient() {
        assert!(StoreError::unavailable("connection refused").is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(StoreError::from(io).is_transient());
        assert!(!StoreError::config("limit must be positive").is_transient());
        assert!(!StoreError::corrupt(1, "bad").is_transient());
    }

    #[test]
    fn test_is_user_error() {
        assert!(StoreError::config("bad").is_user_error());
        assert!(!StoreError::unavailable("down").is_user_error());
    }

    #[test]
    fn test_toml_errors_are_config_errors() {
        let err: StoreError = toml::from_str::<toml::Value>("limit = ").unwrap_err().into();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
