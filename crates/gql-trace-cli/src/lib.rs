//! # gql-trace CLI
//!
//! Operator tooling for the persistent trace store written by
//! [`gql_trace_storage::SledTraceStore`]: list retained traces, summarize one,
//! export it for the Perfetto UI, or delete traces.
//!
//! ```rust,ignore
//! use clap::Parser;
//! use gql_trace_cli::{run_cli, TraceCli};
//!
//! fn main() {
//!     let cli = TraceCli::parse();
//!     std::process::exit(run_cli(cli).into());
//! }
//! ```

pub mod cli;
pub mod error;

pub use cli::{ExitCode, OutputFormat, TraceCli, TraceCommands};
pub use error::CliError;

/// Run the CLI and map the outcome to an exit code
pub fn run_cli(cli: TraceCli) -> ExitCode {
    match cli::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from_error(&e)
        }
    }
}
