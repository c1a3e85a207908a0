//! Recompute-and-compare verification of persisted epoch artifacts.
//!
//! For every batch file: the canonical hash of the record without `hash`
//! must equal the stored `hash`, and the Merkle root rebuilt from `data`
//! must equal the stored `merkleRoot`. For `superRoot.json`: the sibling
//! batch files are listed, sorted by batch id, and `batchIds`,
//! `batchRoots`, and `superRoot` are all recomputed and compared. One
//! outcome per file; the run verifies iff every file does.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::canonical::{canonical_bytes, sha256_hex, CanonicalValue};
use crate::error::HgcError;
use crate::merkle;

/// Verification result for one artifact file.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub file: String,
    pub ok: bool,
    pub detail: String,
}

/// Verify every artifact in one epoch directory.
pub fn verify_epoch_dir(dir: &Path) -> Result<Vec<VerifyOutcome>, HgcError> {
    let mut outcomes = Vec::new();
    let mut batch_files = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| HgcError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| HgcError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".json") || name == "invalidSamples.json" {
            continue;
        }
        if name != "superRoot.json" {
            batch_files.push(name);
        }
    }
    batch_files.sort();

    let mut siblings: Vec<(String, String)> = Vec::new();
    for name in &batch_files {
        let outcome = verify_batch_file(&dir.join(name), &mut siblings);
        outcomes.push(VerifyOutcome {
            file: name.clone(),
            ok: outcome.is_ok(),
            detail: outcome.err().unwrap_or_default(),
        });
    }

    let super_path = dir.join("superRoot.json");
    if super_path.exists() {
        let outcome = verify_super_root(&super_path, &siblings);
        outcomes.push(VerifyOutcome {
            file: "superRoot.json".to_string(),
            ok: outcome.is_ok(),
            detail: outcome.err().unwrap_or_default(),
        });
    } else {
        outcomes.push(VerifyOutcome {
            file: "superRoot.json".to_string(),
            ok: false,
            detail: "missing".to_string(),
        });
    }

    Ok(outcomes)
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let bytes = fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {}", e))
}

fn field_str(value: &serde_json::Value, key: &str) -> Result<String, String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("missing field '{}'", key))
}

/// Check one batch file; on success, push `(geoBatchId, merkleRoot)` for
/// the super-root recomputation.
fn verify_batch_file(
    path: &Path,
    siblings: &mut Vec<(String, String)>,
) -> Result<(), String> {
    let record = read_json(path)?;
    let stored_hash = field_str(&record, "hash")?;
    let stored_root = field_str(&record, "merkleRoot")?;
    let batch_id = field_str(&record, "geoBatchId")?;

    // 1. Record hash over everything except `hash`.
    let mut stripped = record.clone();
    stripped
        .as_object_mut()
        .ok_or_else(|| "record is not an object".to_string())?
        .remove("hash");
    let canonical = CanonicalValue::from_json(&stripped).map_err(|e| e.to_string())?;
    let recomputed_hash =
        sha256_hex(&canonical_bytes(&canonical).map_err(|e| e.to_string())?);
    if recomputed_hash != stored_hash {
        return Err(format!(
            "hash mismatch: stored {} recomputed {}",
            stored_hash, recomputed_hash
        ));
    }

    // 2. Merkle root over the data object.
    let data = record
        .get("data")
        .and_then(|d| d.as_object())
        .ok_or_else(|| "missing data object".to_string())?;
    let mut data_map = BTreeMap::new();
    for (k, v) in data {
        data_map.insert(
            k.clone(),
            CanonicalValue::from_json(v).map_err(|e| e.to_string())?,
        );
    }
    let rebuilt = merkle::build_from_data(&data_map).map_err(|e| e.to_string())?;
    if rebuilt.root != stored_root {
        return Err(format!(
            "merkle root mismatch: stored {} recomputed {}",
            stored_root, rebuilt.root
        ));
    }

    siblings.push((batch_id, stored_root));
    Ok(())
}

fn verify_super_root(path: &Path, siblings: &[(String, String)]) -> Result<(), String> {
    let record = read_json(path)?;
    let stored_root = field_str(&record, "superRoot")?;

    let mut pairs = siblings.to_vec();
    pairs.sort();
    let expected_ids: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(id, _)| serde_json::Value::String(id.clone()))
        .collect();
    let expected_roots: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(_, root)| serde_json::Value::String(root.clone()))
        .collect();

    let stored_ids = record
        .get("batchIds")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "missing batchIds".to_string())?;
    if stored_ids != &expected_ids {
        return Err("batchIds mismatch".to_string());
    }
    let stored_roots = record
        .get("batchRoots")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "missing batchRoots".to_string())?;
    if stored_roots != &expected_roots {
        return Err("batchRoots mismatch".to_string());
    }

    let recomputed = merkle::super_root(&pairs);
    if recomputed != stored_root {
        return Err(format!(
            "superRoot mismatch: stored {} recomputed {}",
            stored_root, recomputed
        ));
    }
    Ok(())
}
