//! CLI command definitions for the trace store
//!
//! Every command works against a [`TraceStore`] so the same code serves the
//! on-disk store and tests.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gql_trace_core::{decode_trace, packet};
use gql_trace_storage::{ListQuery, TraceId, TraceStore};

use super::output::{OutputFormat, TraceDetail, TraceListOutput};
use super::ExitCode;
use crate::error::CliError;

/// Stored trace inspection
///
/// List, summarize, export and delete the detailed traces an application
/// saved into a persistent trace store.
#[derive(Parser, Debug)]
#[command(name = "gql-trace")]
#[command(about = "Inspect and export stored execution traces", long_about = None)]
#[command(version)]
pub struct TraceCli {
    /// Path to the sled trace store
    #[arg(short, long, env = "GQL_TRACE_PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Enforce a retention limit when opening the store (evicts the oldest traces)
    #[arg(long, global = true)]
    pub limit: Option<usize>,

    #[command(subcommand)]
    pub command: TraceCommands,
}

/// Available trace store commands
#[derive(Subcommand, Debug)]
pub enum TraceCommands {
    /// List stored traces, most recent first
    List {
        /// Show at most this many traces
        #[arg(long)]
        last: Option<usize>,

        /// Only traces started before this time (milliseconds since the epoch)
        #[arg(long)]
        before: Option<i64>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Summarize one trace
    Show {
        /// Trace id
        id: TraceId,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Write one trace to a file
    ///
    /// The binary form opens directly in the Perfetto UI.
    Export {
        /// Trace id
        id: TraceId,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,

        /// Write pretty-printed debug JSON instead of binary
        #[arg(long)]
        debug_json: bool,
    },

    /// Delete one trace
    Delete {
        /// Trace id
        id: TraceId,
    },

    /// Delete every stored trace
    Clear,
}

/// Execute the list command
pub fn execute_list(
    store: &dyn TraceStore,
    last: Option<usize>,
    before: Option<i64>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<ExitCode> {
    if last == Some(0) {
        return Err(CliError::invalid_input("--last must be at least 1").into());
    }
    let query = ListQuery { last, before };
    let traces = store.list(query).context("Failed to list traces")?;
    TraceListOutput::from_traces(&traces).render(format, out)?;
    Ok(ExitCode::Success)
}

/// Execute the show command
pub fn execute_show(
    store: &dyn TraceStore,
    id: TraceId,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<ExitCode> {
    let trace = store
        .find(id)
        .with_context(|| format!("Failed to read trace {}", id))?
        .ok_or(CliError::NotFound(id))?;
    TraceDetail::from_trace(&trace).render(format, out)?;
    Ok(ExitCode::Success)
}

/// Execute the export command
pub fn execute_export(
    store: &dyn TraceStore,
    id: TraceId,
    output: &Path,
    debug_json: bool,
    out: &mut dyn Write,
) -> anyhow::Result<ExitCode> {
    let trace = store
        .find(id)
        .with_context(|| format!("Failed to read trace {}", id))?
        .ok_or(CliError::NotFound(id))?;

    let bytes = if debug_json {
        let packets = decode_trace(&trace.trace_data)
            .with_context(|| format!("Trace {} has an undecodable payload", id))?;
        packet::to_debug_json(&packets)?.into_bytes()
    } else {
        trace.trace_data
    };
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write '{}'", output.display()))?;

    tracing::debug!(trace_id = id, bytes = bytes.len(), debug_json, "Trace exported");
    writeln!(out, "Exported trace {} to {}", id, output.display())?;
    Ok(ExitCode::Success)
}

/// Execute the delete command
pub fn execute_delete(store: &dyn TraceStore, id: TraceId, out: &mut dyn Write) -> anyhow::Result<ExitCode> {
    if !store.delete(id).with_context(|| format!("Failed to delete trace {}", id))? {
        return Err(CliError::NotFound(id).into());
    }
    writeln!(out, "Deleted trace {}", id)?;
    Ok(ExitCode::Success)
}

/// Execute the clear command
pub fn execute_clear(store: &dyn TraceStore, out: &mut dyn Write) -> anyhow::Result<ExitCode> {
    let removed = store.delete_all().context("Failed to clear traces")?;
    writeln!(out, "Deleted {} trace(s)", removed)?;
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gql_trace_storage::MemoryTraceStore;

    fn store_with(names: &[&str]) -> MemoryTraceStore {
        let store = MemoryTraceStore::new(10).unwrap();
        for (i, name) in names.iter().enumerate() {
            store.save(name, 5, i as i64 * 1000, vec![]).unwrap();
        }
        store
    }

    #[test]
    fn test_cli_parses_list() {
        let cli = TraceCli::parse_from([
            "gql-trace", "--store", "/tmp/t", "list", "--last", "3", "--before", "100", "--format", "json",
        ]);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/t")));
        match cli.command {
            TraceCommands::List { last, before, format } => {
                assert_eq!(last, Some(3));
                assert_eq!(before, Some(100));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_export() {
        let cli = TraceCli::parse_from(["gql-trace", "export", "7", "-o", "out.json", "--debug-json", "-s", "db"]);
        match cli.command {
            TraceCommands::Export { id, output, debug_json } => {
                assert_eq!(id, 7);
                assert_eq!(output, PathBuf::from("out.json"));
                assert!(debug_json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_list_json() {
        let store = store_with(&["A", "B", "C"]);
        let mut out = Vec::new();
        execute_list(&store, Some(2), None, OutputFormat::Json, &mut out).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["traces"][0]["operation_name"], "C");
        assert_eq!(json["traces"][1]["operation_name"], "B");
    }

    #[test]
    fn test_list_rejects_zero_last() {
        let store = store_with(&[]);
        let err = execute_list(&store, Some(0), None, OutputFormat::Table, &mut Vec::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::InvalidInput(_))));
    }

    #[test]
    fn test_show_missing_trace() {
        let store = store_with(&["A"]);
        let err = execute_show(&store, 99, OutputFormat::Table, &mut Vec::new()).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::NotFound(99))));
    }

    #[test]
    fn test_delete_and_clear() {
        let store = store_with(&["A", "B"]);
        let mut out = Vec::new();
        execute_delete(&store, 1, &mut out).unwrap();
        assert!(execute_delete(&store, 1, &mut out).is_err());

        execute_clear(&store, &mut out).unwrap();
        assert_eq!(store.len().unwrap(), 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Deleted trace 1"));
        assert!(text.contains("Deleted 1 trace(s)"));
    }
}
