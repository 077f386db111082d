//! CLI module for the stored trace inspector

pub mod commands;
pub mod output;

pub use commands::{TraceCli, TraceCommands};
pub use output::{OutputFormat, TraceDetail, TraceListOutput};

use std::io::Write;

use anyhow::Context;
use gql_trace_storage::{SledTraceStore, StoreError, TraceStore};

use crate::error::CliError;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Invalid input or arguments
    InvalidInput = 3,
    /// Trace not found
    NotFound = 4,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Classify a failed command
    pub fn from_error(err: &anyhow::Error) -> Self {
        if let Some(cli) = err.downcast_ref::<CliError>() {
            return match cli {
                CliError::InvalidInput(_) => ExitCode::InvalidInput,
                CliError::NotFound(_) => ExitCode::NotFound,
            };
        }
        match err.downcast_ref::<StoreError>() {
            Some(store) if store.is_user_error() => ExitCode::InvalidInput,
            _ => ExitCode::InternalError,
        }
    }
}

/// Open the store named on the command line
///
/// An inspection tool never creates a store, so a missing path is an error.
pub fn open_store(cli: &TraceCli) -> anyhow::Result<SledTraceStore> {
    let path = cli
        .store
        .as_deref()
        .ok_or_else(|| CliError::invalid_input("no trace store given (use --store or GQL_TRACE_PATH)"))?;
    if !path.exists() {
        return Err(CliError::invalid_input(format!("no trace store at '{}'", path.display())).into());
    }
    let store = SledTraceStore::open(path, cli.limit.unwrap_or(usize::MAX))
        .with_context(|| format!("Failed to open trace store at '{}'", path.display()))?;
    Ok(store)
}

/// Run one command against `store`, writing results to `out`
pub fn execute(command: TraceCommands, store: &dyn TraceStore, out: &mut dyn Write) -> anyhow::Result<ExitCode> {
    match command {
        TraceCommands::List { last, before, format } => commands::execute_list(store, last, before, format, out),
        TraceCommands::Show { id, format } => commands::execute_show(store, id, format, out),
        TraceCommands::Export { id, output, debug_json } => {
            commands::execute_export(store, id, &output, debug_json, out)
        }
        TraceCommands::Delete { id } => commands::execute_delete(store, id, out),
        TraceCommands::Clear => commands::execute_clear(store, out),
    }
}

/// Run the CLI with the given arguments and return the exit code
pub fn run(cli: TraceCli) -> anyhow::Result<ExitCode> {
    let store = open_store(&cli)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let code = execute(cli.command, &store, &mut out)?;
    out.flush()?;
    Ok(code)
}
