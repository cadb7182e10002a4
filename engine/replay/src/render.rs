//! Snapshot rendering for the terminal

use std::fmt::{self, Write as _};

use anyhow::Result;
use clap::ValueEnum;
use stream_engine_core::{SessionSnapshot, SessionStatus};

/// Output format for printed snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable sections
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Render a snapshot in the requested format
pub fn render(snapshot: &SessionSnapshot, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(snapshot)?),
        OutputFormat::Text => Ok(render_text(snapshot)?),
    }
}

fn render_text(snapshot: &SessionSnapshot) -> Result<String, fmt::Error> {
    let mut out = String::new();

    write!(out, "[{}] {:>3}%", snapshot.status, snapshot.progress)?;
    if let Some(status) = &snapshot.latest_status {
        write!(out, "  {status}")?;
    }
    out.push('\n');

    for section in &snapshot.sections {
        let marker = if section.is_final { "" } else { " …" };
        writeln!(out, "\n== {}{marker} ==", section.title)?;
        writeln!(out, "{}", section.rendered())?;
    }

    if !snapshot.streaming_text.is_empty() {
        writeln!(out, "\n>> {}", snapshot.streaming_text)?;
    }

    if let Some(detail) = &snapshot.error_detail {
        writeln!(out, "\nerror: {detail}")?;
    }

    if !snapshot.diagnostics.is_empty() {
        writeln!(out, "\n({} frame(s) skipped)", snapshot.diagnostics.total())?;
    }

    Ok(out)
}

/// Process exit code for a terminal status
#[must_use]
pub fn exit_code(status: SessionStatus) -> u8 {
    match status {
        SessionStatus::Completed => 0,
        SessionStatus::Cancelled => 130,
        SessionStatus::Errored | SessionStatus::Idle | SessionStatus::Active => 1,
    }
}
