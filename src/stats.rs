//! Artifact directory statistics.
//!
//! Provides a quick summary of what a base directory holds: epochs, batch
//! and sample counts, map coverage. Used by `hgc stats` to give confidence
//! that runs and merges are producing what they should.

use std::path::Path;

use anyhow::Result;

use crate::persist;

struct EpochStats {
    epoch: u64,
    batches: u64,
    samples: u64,
    super_root: String,
    written_ts: Option<i64>,
}

/// Run the stats command: walk the data directory and print a summary.
pub fn run_stats(base_dir: &Path) -> Result<()> {
    let data = persist::data_dir(base_dir);
    if !data.exists() {
        println!("No data directory at {}", data.display());
        return Ok(());
    }

    let mut epochs: Vec<EpochStats> = Vec::new();
    let mut dir_size = 0u64;
    for entry in std::fs::read_dir(&data)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_file() {
            dir_size += entry.metadata()?.len();
            continue;
        }
        let Some(epoch) = name.strip_prefix("epoch_").and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        let super_path = entry.path().join("superRoot.json");
        let record: serde_json::Value = match std::fs::read(&super_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(_) => continue,
        };
        let written_ts = std::fs::metadata(&super_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        for file in std::fs::read_dir(entry.path())? {
            dir_size += file?.metadata()?.len();
        }
        epochs.push(EpochStats {
            epoch,
            batches: record["batchesTotal"].as_u64().unwrap_or(0),
            samples: record["samplesTotal"].as_u64().unwrap_or(0),
            super_root: record["superRoot"].as_str().unwrap_or("?").to_string(),
            written_ts,
        });
    }
    epochs.sort_by_key(|e| e.epoch);

    let map = persist::load_map(base_dir)?;
    let map_entries: usize = map.values().map(|cells| cells.len()).sum();
    let map_hash = persist::map_content_hash(&map)?;

    println!("HGC — Artifact Stats");
    println!("====================");
    println!();
    println!("  Base dir:    {}", base_dir.display());
    println!("  Size:        {}", format_bytes(dir_size));
    println!();
    println!("  Epochs:      {}", epochs.len());
    println!("  Map entries: {} ({} epochs)", map_entries, map.len());
    println!("  Map hash:    {}", map_hash);

    if !epochs.is_empty() {
        println!();
        println!("  By epoch:");
        println!(
            "  {:<8} {:>8} {:>10}   {:<18} {}",
            "EPOCH", "BATCHES", "SAMPLES", "SUPER ROOT", "WRITTEN"
        );
        println!("  {}", "-".repeat(72));
        for e in &epochs {
            let written = match e.written_ts {
                Some(ts) => format_ts_relative(ts),
                None => "?".to_string(),
            };
            println!(
                "  {:<8} {:>8} {:>10}   {:<18} {}",
                e.epoch,
                e.batches,
                e.samples,
                format!("{}…", &e.super_root[..16.min(e.super_root.len())]),
                written
            );
        }
    }

    println!();
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
