//! Core data models for the epoch pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! Sample → validate/dedup → SampleEntry (per cell) → compress() → Segment
//!                                                         ↓
//!                                            assemble() → Batch
//!                                                         ↓
//!                                      super-root → SuperRootRecord
//!                                                         ↓
//!                                      persist  → files + CrossEpochMap
//! ```
//!
//! Samples are ephemeral inputs; per-cell entry tables live only for one
//! epoch run; batches and the super-root record are written once and never
//! mutated; the cross-epoch map is append-only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalValue;
use crate::cell::CellId;
use crate::config::HgcParams;

/// One hour in milliseconds: the fixed epoch window.
pub const WINDOW_MS: u64 = 3_600_000;

/// Schema version stamped on every persisted record.
pub const SCHEMA_VERSION: u32 = 1;

/// A raw geo-tagged sensor reading as received on the wire.
///
/// Sensor fields (`co2`, `pm25`, `temp`, `hum`, …) are an open set and are
/// kept in `readings`; only the known ones are range-checked. A sample may
/// carry an inner `samples` array of readings taken by the same device in
/// the same window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Cell id in canonical string form, at any resolution >= `base_res`.
    /// Inner samples inherit the outer cell and may omit it.
    #[serde(rename = "geoCellId", default, skip_serializing_if = "Option::is_none")]
    pub geo_cell_id: Option<String>,
    /// Capture time in epoch milliseconds. Absent timestamps sort as 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Submitting device identity, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Optional nested readings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<Sample>>,
    /// Sensor readings keyed by field name.
    #[serde(flatten)]
    pub readings: BTreeMap<String, serde_json::Value>,
}

/// A validated, deduplicated reading bucketed under its base-res cell.
///
/// `value` is the canonical form of the sample minus `geoCellId` (the cell
/// is the bucket key); it is what gets hashed into the batch Merkle tree
/// and written into the batch `data` table.
#[derive(Debug, Clone)]
pub struct SampleEntry {
    /// Effective timestamp used for ordering (absent → 0).
    pub timestamp: i64,
    /// Dedup key: `"{issuer}-{timestamp}"` or the canonical content hash.
    pub dedup_key: String,
    /// Number of readings this entry represents (inner array length or 1).
    pub weight: u64,
    /// Canonical entry payload.
    pub value: CanonicalValue,
}

/// A rejected sample kept on the side-channel in `mark` mode.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidSample {
    pub reason: String,
    pub sample: serde_json::Value,
}

/// One compressed geographic batch: the unit of persistence and
/// registration.
///
/// `hash` is the SHA-256 of the canonical encoding of the record with the
/// `hash` field removed; it is `None` only transiently during assembly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub geo_batch_id: String,
    pub epoch: u64,
    pub compressed_from: Vec<String>,
    pub data: BTreeMap<String, Vec<CanonicalValue>>,
    pub count_leaves: u64,
    pub count_samples: u64,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
    pub center: [f64; 2],
    pub boundary: Vec<[f64; 2]>,
    pub res_base: u8,
    pub res_batch: u8,
    pub epoch_start_ms: u64,
    pub window_ms: u64,
    pub schema_version: u32,
    pub hgc_params: HgcParams,
    pub merkle_root: String,
    pub leaves_index: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Epoch-level commitment record written as `superRoot.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperRootRecord {
    pub epoch: u64,
    pub super_root: String,
    pub batch_ids: Vec<String>,
    pub batch_roots: Vec<String>,
    pub schema_version: u32,
    pub hgc_params: HgcParams,
    pub ts_min: Option<i64>,
    pub ts_max: Option<i64>,
    pub batches_total: u64,
    pub samples_total: u64,
}

/// Cross-epoch mapping of leaf cells to the batch that absorbed them.
///
/// Outer key: epoch. Inner key: cell id string. Append-only: an existing
/// entry may be re-asserted with the same batch id but never replaced.
pub type CrossEpochMap = BTreeMap<u64, BTreeMap<String, String>>;

/// Everything one epoch run produced, before persistence.
#[derive(Debug)]
pub struct EpochResult {
    pub batches: Vec<Batch>,
    pub cell_to_batch: BTreeMap<String, String>,
    pub super_root: SuperRootRecord,
    pub summary: EpochSummary,
    pub invalid_samples: Vec<InvalidSample>,
}

/// Counters surfaced by `hgc run`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EpochSummary {
    pub samples_in: u64,
    pub samples_rejected: u64,
    pub samples_deduplicated: u64,
    pub cells: u64,
    pub batches: u64,
    pub samples_total: u64,
}

/// An emitted compressor segment: a set of base-res cells that become one
/// batch. Below the base resolution the cells share a parent at `res`; a
/// base-res segment is a packed run named by its first cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub res: u8,
    pub cells: Vec<CellId>,
}
