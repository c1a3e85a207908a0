//! Persistence layout and the cross-epoch map merge.
//!
//! ```text
//! <base>/data/epoch_<E>/<geoBatchId>.json    one per batch
//! <base>/data/epoch_<E>/superRoot.json
//! <base>/data/epoch_<E>/invalidSamples.json  mark mode, when non-empty
//! <base>/data/cellToBatchMap.json            cross-epoch, merged
//! ```
//!
//! Epoch artifacts are written into a staging directory and renamed into
//! place only after the map merge has succeeded, so a failed or cancelled
//! run leaves the filesystem unchanged. The map merge itself holds an
//! exclusive lock file for its whole read-merge-write cycle and writes
//! through a temp file + rename; a conflicting assignment fails the merge
//! before any byte of the map is touched.
//!
//! File bytes are the canonical encoding of each record. The map file is
//! the one exception to pure canonical ordering: its outer keys are sorted
//! by numeric epoch (so epoch 2 precedes epoch 10), while the logged
//! content hash is computed over the canonical form.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::canonical::{canonical_bytes, record_bytes, sha256_hex, CanonicalValue};
use crate::error::HgcError;
use crate::models::{Batch, CrossEpochMap, InvalidSample, SuperRootRecord};

/// Name of the cross-epoch map file under `<base>/data/`.
pub const MAP_FILE: &str = "cellToBatchMap.json";

/// Directory holding all persisted artifacts.
pub fn data_dir(base: &Path) -> PathBuf {
    base.join("data")
}

/// Final directory for one epoch's artifacts.
pub fn epoch_dir(base: &Path, epoch: u64) -> PathBuf {
    data_dir(base).join(format!("epoch_{}", epoch))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), HgcError> {
    fs::write(path, bytes).map_err(|e| HgcError::io(path, e))
}

/// Write all epoch artifacts into a staging directory and return its path.
///
/// Nothing under the final epoch directory is touched.
pub fn stage_epoch(
    base: &Path,
    epoch: u64,
    batches: &[Batch],
    super_root: &SuperRootRecord,
    invalid: &[InvalidSample],
) -> Result<PathBuf, HgcError> {
    let staging = data_dir(base).join(format!(".epoch_{}.staging", epoch));
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| HgcError::io(&staging, e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| HgcError::io(&staging, e))?;

    for batch in batches {
        let path = staging.join(format!("{}.json", batch.geo_batch_id));
        write_file(&path, &record_bytes(batch)?)?;
    }
    write_file(&staging.join("superRoot.json"), &record_bytes(super_root)?)?;
    if !invalid.is_empty() {
        write_file(
            &staging.join("invalidSamples.json"),
            &record_bytes(&invalid)?,
        )?;
    }
    Ok(staging)
}

/// Promote a staged epoch directory to its final location.
///
/// A re-run of the same epoch replaces the previous directory wholesale;
/// the artifacts are deterministic, so the replacement is byte-identical
/// unless the parameters changed (in which case the map merge has already
/// rejected the run).
pub fn commit_epoch(base: &Path, epoch: u64, staging: &Path) -> Result<PathBuf, HgcError> {
    let target = epoch_dir(base, epoch);
    if target.exists() {
        fs::remove_dir_all(&target).map_err(|e| HgcError::io(&target, e))?;
    }
    fs::rename(staging, &target).map_err(|e| HgcError::io(&target, e))?;
    Ok(target)
}

/// Discard a staged epoch directory after a failed run.
pub fn discard_staging(staging: &Path) {
    let _ = fs::remove_dir_all(staging);
}

/// Exclusive lock over the cross-epoch map, held for the whole
/// read-merge-write cycle. Dropping the guard releases the lock.
#[derive(Debug)]
pub struct MapLock {
    path: PathBuf,
}

impl MapLock {
    pub fn acquire(base: &Path) -> Result<MapLock, HgcError> {
        let dir = data_dir(base);
        fs::create_dir_all(&dir).map_err(|e| HgcError::io(&dir, e))?;
        let path = dir.join(format!("{}.lock", MAP_FILE));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(MapLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(HgcError::ConcurrentMerge { path })
            }
            Err(e) => Err(HgcError::io(&path, e)),
        }
    }
}

impl Drop for MapLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Load the cross-epoch map; an absent file is an empty map.
pub fn load_map(base: &Path) -> Result<CrossEpochMap, HgcError> {
    let path = data_dir(base).join(MAP_FILE);
    if !path.exists() {
        return Ok(CrossEpochMap::new());
    }
    let bytes = fs::read(&path).map_err(|e| HgcError::io(&path, e))?;
    let raw: BTreeMap<String, BTreeMap<String, String>> = serde_json::from_slice(&bytes)
        .map_err(|e| HgcError::encode(format!("map file {} is corrupt: {}", path.display(), e)))?;
    let mut map = CrossEpochMap::new();
    for (epoch_str, cells) in raw {
        let epoch: u64 = epoch_str.parse().map_err(|_| {
            HgcError::encode(format!("map file has non-numeric epoch key '{}'", epoch_str))
        })?;
        map.insert(epoch, cells);
    }
    Ok(map)
}

/// Merge one epoch's cell assignments into the cross-epoch map.
///
/// A cell already mapped to a different batch id in this epoch is a
/// conflict; the map is left unmodified in that case.
pub fn merge_into(
    map: &mut CrossEpochMap,
    epoch: u64,
    assignments: &BTreeMap<String, String>,
) -> Result<(), HgcError> {
    if let Some(existing) = map.get(&epoch) {
        for (cell, batch_id) in assignments {
            if let Some(prev) = existing.get(cell) {
                if prev != batch_id {
                    return Err(HgcError::CellMapConflict {
                        epoch,
                        cell: cell.clone(),
                        existing: prev.clone(),
                        incoming: batch_id.clone(),
                    });
                }
            }
        }
    }
    map.entry(epoch).or_default().extend(
        assignments
            .iter()
            .map(|(c, b)| (c.clone(), b.clone())),
    );
    Ok(())
}

/// Serialize the map with numeric epoch order and canonical inner maps.
fn map_file_bytes(map: &CrossEpochMap) -> Result<Vec<u8>, HgcError> {
    let mut out = String::from("{");
    for (i, (epoch, cells)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('"');
        out.push_str(&epoch.to_string());
        out.push_str("\":");
        let inner = CanonicalValue::Map(
            cells
                .iter()
                .map(|(c, b)| (c.clone(), CanonicalValue::Str(b.clone())))
                .collect(),
        );
        out.push_str(
            std::str::from_utf8(&canonical_bytes(&inner)?)
                .expect("canonical bytes are UTF-8"),
        );
    }
    out.push('}');
    Ok(out.into_bytes())
}

/// Canonical content hash of the map, logged after every merge.
pub fn map_content_hash(map: &CrossEpochMap) -> Result<String, HgcError> {
    let value = CanonicalValue::Map(
        map.iter()
            .map(|(epoch, cells)| {
                (
                    epoch.to_string(),
                    CanonicalValue::Map(
                        cells
                            .iter()
                            .map(|(c, b)| (c.clone(), CanonicalValue::Str(b.clone())))
                            .collect(),
                    ),
                )
            })
            .collect(),
    );
    Ok(sha256_hex(&canonical_bytes(&value)?))
}

/// Write the merged map atomically (temp file + rename) and return its
/// content hash.
pub fn write_map(base: &Path, map: &CrossEpochMap) -> Result<String, HgcError> {
    let dir = data_dir(base);
    fs::create_dir_all(&dir).map_err(|e| HgcError::io(&dir, e))?;
    let path = dir.join(MAP_FILE);
    let tmp = dir.join(format!("{}.tmp", MAP_FILE));
    write_file(&tmp, &map_file_bytes(map)?)?;
    fs::rename(&tmp, &path).map_err(|e| HgcError::io(&path, e))?;
    map_content_hash(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn assignments(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(c, b)| (c.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn merge_detects_conflicts_and_leaves_map_unchanged() {
        let mut map = CrossEpochMap::new();
        merge_into(&mut map, 0, &assignments(&[("cell-1", "batch-a")])).unwrap();
        let before = map.clone();

        let err = merge_into(&mut map, 0, &assignments(&[("cell-1", "batch-b")])).unwrap_err();
        assert!(matches!(err, HgcError::CellMapConflict { .. }));
        assert_eq!(map, before);
    }

    #[test]
    fn remerge_of_same_assignment_is_idempotent() {
        let mut map = CrossEpochMap::new();
        let a = assignments(&[("cell-1", "batch-a"), ("cell-2", "batch-a")]);
        merge_into(&mut map, 4, &a).unwrap();
        let hash1 = map_content_hash(&map).unwrap();
        merge_into(&mut map, 4, &a).unwrap();
        let hash2 = map_content_hash(&map).unwrap();
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn map_file_orders_epochs_numerically() {
        let mut map = CrossEpochMap::new();
        merge_into(&mut map, 10, &assignments(&[("c", "b")])).unwrap();
        merge_into(&mut map, 2, &assignments(&[("c", "b")])).unwrap();
        let bytes = map_file_bytes(&map).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let pos2 = text.find("\"2\"").unwrap();
        let pos10 = text.find("\"10\"").unwrap();
        assert!(pos2 < pos10, "epoch 2 must precede epoch 10: {}", text);
    }

    #[test]
    fn write_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut map = CrossEpochMap::new();
        merge_into(&mut map, 0, &assignments(&[("cell-1", "batch-a")])).unwrap();
        merge_into(&mut map, 7, &assignments(&[("cell-9", "batch-z")])).unwrap();
        write_map(tmp.path(), &map).unwrap();
        let loaded = load_map(tmp.path()).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn absent_map_loads_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_map(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let tmp = TempDir::new().unwrap();
        let lock = MapLock::acquire(tmp.path()).unwrap();
        let err = MapLock::acquire(tmp.path()).unwrap_err();
        assert!(matches!(err, HgcError::ConcurrentMerge { .. }));
        drop(lock);
        MapLock::acquire(tmp.path()).unwrap();
    }
}
