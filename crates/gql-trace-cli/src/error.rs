//! CLI error conditions that map to specific exit codes

use thiserror::Error;

/// Errors the CLI reports with a dedicated exit code
#[derive(Error, Debug)]
pub enum CliError {
    /// Bad arguments or a missing store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No trace with this id in the store
    #[error("Trace {0} not found")]
    NotFound(u64),
}

impl CliError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        CliError::InvalidInput(msg.into())
    }
}
