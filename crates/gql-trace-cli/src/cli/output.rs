//! Output formatting for the trace CLI
//!
//! Listings and trace summaries render either as colored tables for a
//! terminal or as JSON for scripts.

use std::io::Write;

use clap::ValueEnum;
use colored::Colorize;
use gql_trace_core::{decode_trace, EventKind};
use gql_trace_storage::StoredTrace;
use serde::Serialize;

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON for machine processing
    Json,
}

/// One row of a listing
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub id: u64,
    pub operation_name: String,
    pub begin_ms: i64,
    /// RFC 3339 start time, when representable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    pub duration_ms: u64,
    pub size_bytes: usize,
}

impl TraceSummary {
    pub fn from_trace(trace: &StoredTrace) -> Self {
        Self {
            id: trace.id,
            operation_name: trace.operation_name.clone(),
            begin_ms: trace.begin_ms,
            begin: trace.begin_time().map(|t| t.to_rfc3339()),
            duration_ms: trace.duration_ms,
            size_bytes: trace.trace_data.len(),
        }
    }
}

/// Result of `list`
#[derive(Debug, Clone, Serialize)]
pub struct TraceListOutput {
    pub count: usize,
    pub traces: Vec<TraceSummary>,
}

impl TraceListOutput {
    pub fn from_traces(traces: &[StoredTrace]) -> Self {
        Self {
            count: traces.len(),
            traces: traces.iter().map(TraceSummary::from_trace).collect(),
        }
    }

    pub fn render(&self, format: OutputFormat, out: &mut dyn Write) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self, out),
            OutputFormat::Table => self.render_table(out),
        }
    }

    fn render_table(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        if self.traces.is_empty() {
            writeln!(out, "{}", "No stored traces".dimmed())?;
            return Ok(());
        }

        writeln!(
            out,
            "{:>8}  {:<32}  {:<25}  {:>10}  {:>10}",
            "ID".bold(),
            "OPERATION".bold(),
            "STARTED".bold(),
            "DURATION".bold(),
            "SIZE".bold()
        )?;
        for trace in &self.traces {
            writeln!(
                out,
                "{:>8}  {:<32}  {:<25}  {:>10}  {:>10}",
                trace.id.to_string().cyan(),
                truncate(&trace.operation_name, 32),
                trace.begin.as_deref().unwrap_or("-"),
                format_duration(trace.duration_ms),
                format_size(trace.size_bytes)
            )?;
        }
        writeln!(out)?;
        writeln!(out, "{} trace(s)", self.count)?;
        Ok(())
    }
}

/// Result of `show`: metadata plus a structural summary of the payload
#[derive(Debug, Clone, Serialize)]
pub struct TraceDetail {
    #[serde(flatten)]
    pub summary: TraceSummary,
    pub packets: usize,
    pub tracks: Vec<String>,
    pub slices: usize,
    pub instants: usize,
    pub counter_samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
}

impl TraceDetail {
    /// Summarize a stored trace; an undecodable payload is reported, not fatal
    pub fn from_trace(trace: &StoredTrace) -> Self {
        let mut detail = Self {
            summary: TraceSummary::from_trace(trace),
            packets: 0,
            tracks: Vec::new(),
            slices: 0,
            instants: 0,
            counter_samples: 0,
            decode_error: None,
        };

        let packets = match decode_trace(&trace.trace_data) {
            Ok(packets) => packets,
            Err(e) => {
                detail.decode_error = Some(e.to_string());
                return detail;
            }
        };
        detail.packets = packets.len();
        for packet in &packets {
            if let Some(descriptor) = packet.track_descriptor() {
                detail.tracks.push(descriptor.name.clone());
            }
            if let Some(event) = packet.track_event() {
                match event.kind {
                    EventKind::SliceBegin => detail.slices += 1,
                    EventKind::Instant => detail.instants += 1,
                    EventKind::Counter => detail.counter_samples += 1,
                    EventKind::SliceEnd => {}
                }
            }
        }
        detail
    }

    pub fn render(&self, format: OutputFormat, out: &mut dyn Write) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => render_json(self, out),
            OutputFormat::Table => self.render_table(out),
        }
    }

    fn render_table(&self, out: &mut dyn Write) -> anyhow::Result<()> {
        let s = &self.summary;
        writeln!(out, "{} {}", "Trace".cyan().bold(), s.id.to_string().cyan().bold())?;
        writeln!(out, "{}", "-".repeat(48))?;
        writeln!(out, "  {:<12} {}", "Operation:".dimmed(), s.operation_name)?;
        writeln!(out, "  {:<12} {}", "Started:".dimmed(), s.begin.as_deref().unwrap_or("-"))?;
        writeln!(out, "  {:<12} {}", "Duration:".dimmed(), format_duration(s.duration_ms))?;
        writeln!(out, "  {:<12} {}", "Size:".dimmed(), format_size(s.size_bytes))?;

        if let Some(error) = &self.decode_error {
            writeln!(out, "  {:<12} {}", "Payload:".dimmed(), error.red())?;
            return Ok(());
        }
        writeln!(out, "  {:<12} {}", "Packets:".dimmed(), self.packets)?;
        writeln!(out, "  {:<12} {}", "Slices:".dimmed(), self.slices)?;
        writeln!(out, "  {:<12} {}", "Instants:".dimmed(), self.instants)?;
        writeln!(out, "  {:<12} {}", "Counters:".dimmed(), self.counter_samples)?;
        writeln!(out, "  {}", "Tracks:".dimmed())?;
        for track in &self.tracks {
            writeln!(out, "    {}", track)?;
        }
        Ok(())
    }
}

fn render_json<T: Serialize>(value: &T, out: &mut dyn Write) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Human-readable byte count
pub fn format_size(bytes: usize) -> String {
    match bytes {
        b if b >= 1 << 20 => format!("{:.1} MiB", b as f64 / (1u64 << 20) as f64),
        b if b >= 1 << 10 => format!("{:.1} KiB", b as f64 / 1024.0),
        b => format!("{} B", b),
    }
}

/// Human-readable duration from milliseconds
pub fn format_duration(ms: u64) -> String {
    if ms >= 1000 {
        format!("{:.2}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}
