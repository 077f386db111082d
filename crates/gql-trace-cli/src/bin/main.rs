//! Stored trace inspection CLI
//!
//! # Usage
//!
//! ```bash
//! # Ten most recent traces
//! gql-trace --store ./traces list --last 10
//!
//! # Summary of one trace
//! gql-trace --store ./traces show 42
//!
//! # Export for ui.perfetto.dev
//! gql-trace --store ./traces export 42 --output trace.perfetto
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 3: Invalid input or arguments
//! - 4: Trace not found
//! - 10: Internal error

use clap::Parser;
use gql_trace_cli::{run_cli, TraceCli};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = TraceCli::parse();

    let exit_code = run_cli(cli);
    std::process::exit(exit_code.into());
}
