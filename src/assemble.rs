//! Batch assembly and the epoch super-root.
//!
//! Turns compressor segments into persisted batch records and commits to
//! the whole epoch with a single sorted-pair Merkle root over
//! `keccak256(geoBatchId ‖ merkleRoot)` leaves.

use std::collections::BTreeMap;

use crate::canonical::{record_hash, CanonicalValue};
use crate::cell::CellId;
use crate::config::HgcParams;
use crate::error::HgcError;
use crate::merkle;
use crate::models::{
    Batch, SampleEntry, Segment, SuperRootRecord, SCHEMA_VERSION, WINDOW_MS,
};

/// Build the batch record for one segment.
///
/// The batch is named by `cellToParent(cells[0], res)`: below the base
/// resolution that is the parent all cells share; at the base resolution it
/// reduces to the first cell itself. The record hash is computed over the
/// canonical encoding of the record without its `hash` field.
pub fn assemble_batch(
    segment: &Segment,
    entries_by_cell: &BTreeMap<CellId, Vec<SampleEntry>>,
    epoch: u64,
    params: &HgcParams,
) -> Result<Batch, HgcError> {
    let mut cells = segment.cells.clone();
    cells.sort();

    let geo_batch_id = cells[0].to_parent(segment.res)?;

    let mut data: BTreeMap<String, Vec<CanonicalValue>> = BTreeMap::new();
    let mut count_samples = 0u64;
    let mut ts_min: Option<i64> = None;
    let mut ts_max: Option<i64> = None;
    for &cell in &cells {
        let entries = entries_by_cell.get(&cell).ok_or_else(|| {
            HgcError::Hierarchy {
                cell: cell.to_string(),
                reason: "segment cell has no entry table".to_string(),
            }
        })?;
        for entry in entries {
            count_samples += entry.weight;
            ts_min = Some(ts_min.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
            ts_max = Some(ts_max.map_or(entry.timestamp, |t| t.max(entry.timestamp)));
        }
        data.insert(
            cell.to_string(),
            entries.iter().map(|e| e.value.clone()).collect(),
        );
    }

    // The tree hashes each cell's entry list as one canonical sequence,
    // matching what the verifier reconstructs from the persisted JSON.
    let data_values: BTreeMap<String, CanonicalValue> = data
        .iter()
        .map(|(k, v)| (k.clone(), CanonicalValue::Seq(v.clone())))
        .collect();
    let merkle = merkle::build_from_data(&data_values)?;

    let mut batch = Batch {
        geo_batch_id: geo_batch_id.to_string(),
        epoch,
        compressed_from: cells.iter().map(|c| c.to_string()).collect(),
        data,
        count_leaves: cells.len() as u64,
        count_samples,
        ts_min,
        ts_max,
        center: geo_batch_id.center(),
        boundary: geo_batch_id.boundary(),
        res_base: params.base_res,
        res_batch: segment.res,
        epoch_start_ms: epoch * WINDOW_MS,
        window_ms: WINDOW_MS,
        schema_version: SCHEMA_VERSION,
        hgc_params: params.clone(),
        merkle_root: merkle.root,
        leaves_index: merkle.leaves_index,
        hash: None,
    };
    batch.hash = Some(record_hash(&batch)?);
    Ok(batch)
}

/// Build the epoch commitment over all batches.
///
/// Batches are sorted by `geoBatchId` before hashing, so the result is the
/// same for any permutation of the input.
pub fn build_super_root(
    batches: &[Batch],
    epoch: u64,
    params: &HgcParams,
) -> SuperRootRecord {
    let mut pairs: Vec<(String, String)> = batches
        .iter()
        .map(|b| (b.geo_batch_id.clone(), b.merkle_root.clone()))
        .collect();
    pairs.sort();

    let batch_ids: Vec<String> = pairs.iter().map(|(id, _)| id.clone()).collect();
    let batch_roots: Vec<String> = pairs.iter().map(|(_, root)| root.clone()).collect();
    let super_root = merkle::super_root(&pairs);

    let ts_min = batches.iter().filter_map(|b| b.ts_min).min();
    let ts_max = batches.iter().filter_map(|b| b.ts_max).max();
    let samples_total = batches.iter().map(|b| b.count_samples).sum();

    SuperRootRecord {
        epoch,
        super_root,
        batch_ids,
        batch_roots,
        schema_version: SCHEMA_VERSION,
        hgc_params: params.clone(),
        ts_min,
        ts_max,
        batches_total: batches.len() as u64,
        samples_total,
    }
}
