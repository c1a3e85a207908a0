//! Pluggable sinks for epoch artifacts.
//!
//! The pipeline hands finished epoch directories to a [`FolderUploader`]
//! (content-addressed storage) and announces each batch to a
//! [`BatchRegistry`] (on-chain registry). Both are async trait objects so
//! real transports can be swapped in; the mock implementations here are
//! deterministic and file-backed. Sink failures surface to the caller but
//! never invalidate artifacts that are already durable locally.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use crate::canonical::sha256_hex;

/// Uploads an epoch directory to content-addressed storage.
#[async_trait]
pub trait FolderUploader: Send + Sync {
    /// Upload the directory and return its content id.
    async fn upload_folder(&self, path: &Path) -> Result<String>;
}

/// Announces a batch to the external registry.
#[async_trait]
pub trait BatchRegistry: Send + Sync {
    async fn register_batch(
        &self,
        epoch: u64,
        geo_batch_id: &str,
        merkle_root: &str,
        cid: &str,
    ) -> Result<()>;
}

/// Mock uploader: the content id is a digest over the folder's files.
///
/// Files are walked in sorted relative-path order; the cid is
/// `sha256Hex(join("{sha256Hex(file)}:{relPath}", '|'))`, so it changes iff
/// any file's bytes or name change.
pub struct MockUploader;

#[async_trait]
impl FolderUploader for MockUploader {
    async fn upload_folder(&self, path: &Path) -> Result<String> {
        let mut parts: Vec<String> = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let bytes = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            parts.push(format!("{}:{}", sha256_hex(&bytes), rel));
        }
        parts.sort();
        Ok(sha256_hex(parts.join("|").as_bytes()))
    }
}

/// Mock registry: append one JSON line per registration.
pub struct JsonlRegistry {
    path: PathBuf,
}

impl JsonlRegistry {
    pub fn new(base: &Path) -> JsonlRegistry {
        JsonlRegistry {
            path: base.join("registry.jsonl"),
        }
    }
}

#[async_trait]
impl BatchRegistry for JsonlRegistry {
    async fn register_batch(
        &self,
        epoch: u64,
        geo_batch_id: &str,
        merkle_root: &str,
        cid: &str,
    ) -> Result<()> {
        let line = serde_json::json!({
            "epoch": epoch,
            "geoBatchId": geo_batch_id,
            "merkleRoot": merkle_root,
            "cid": cid,
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn mock_cid_tracks_content() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.json"), b"{\"x\":1}").unwrap();
        std::fs::write(tmp.path().join("b.json"), b"{\"y\":2}").unwrap();

        let cid1 = MockUploader.upload_folder(tmp.path()).await.unwrap();
        let cid2 = MockUploader.upload_folder(tmp.path()).await.unwrap();
        assert_eq!(cid1, cid2);

        std::fs::write(tmp.path().join("b.json"), b"{\"y\":3}").unwrap();
        let cid3 = MockUploader.upload_folder(tmp.path()).await.unwrap();
        assert_ne!(cid1, cid3);
    }

    #[tokio::test]
    async fn registry_appends_jsonl() {
        let tmp = TempDir::new().unwrap();
        let registry = JsonlRegistry::new(tmp.path());
        registry.register_batch(0, "00aa", "beef", "cid1").await.unwrap();
        registry.register_batch(0, "00bb", "f00d", "cid1").await.unwrap();
        let text = std::fs::read_to_string(tmp.path().join("registry.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["geoBatchId"], "00aa");
    }
}
