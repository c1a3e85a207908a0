//! Run progress reporting.
//!
//! Reports observable progress during `hgc run` so users see which phase
//! the epoch is in and how much is left. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for an epoch run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Validation and dedup: n samples processed out of total.
    Validating { n: u64, total: u64 },
    /// The compressor walk is running. Cell count known, batch count not.
    Compressing { cells: u64 },
    /// Batch assembly and hashing: n batches built out of total.
    Hashing { n: u64, total: u64 },
    /// Artifacts are being staged and the map merged.
    Writing,
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "run  hashing  12 / 40 batches".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Validating { n, total } => {
                format!(
                    "run  validating  {} / {} samples\n",
                    format_number(*n),
                    format_number(*total)
                )
            }
            RunProgressEvent::Compressing { cells } => {
                format!("run  compressing  {} cells\n", format_number(*cells))
            }
            RunProgressEvent::Hashing { n, total } => {
                format!(
                    "run  hashing  {} / {} batches\n",
                    format_number(*n),
                    format_number(*total)
                )
            }
            RunProgressEvent::Writing => "run  writing artifacts...\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Validating { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "validating",
                "n": n,
                "total": total
            }),
            RunProgressEvent::Compressing { cells } => serde_json::json!({
                "event": "progress",
                "phase": "compressing",
                "cells": cells
            }),
            RunProgressEvent::Hashing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "hashing",
                "n": n,
                "total": total
            }),
            RunProgressEvent::Writing => serde_json::json!({
                "event": "progress",
                "phase": "writing"
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            ),
        }
    }

    /// Build a reporter for this mode. Caller passes it to the run.
    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("off").unwrap(), ProgressMode::Off);
        assert_eq!(ProgressMode::parse("json").unwrap(), ProgressMode::Json);
        assert!(ProgressMode::parse("loud").is_err());
    }
}
