//! Sample validation, normalization, and deduplication.
//!
//! Every incoming reading is checked against the grid (cell validity) and
//! the declared sensor ranges, normalized to the base resolution, and
//! deduplicated per target cell. The configured [`OnInvalid`] mode decides
//! whether a rejection fails the epoch, lands on a side-channel, or is
//! dropped; the mode applies recursively to nested `samples` arrays.
//!
//! Output entries are sorted by ascending effective timestamp with the
//! dedup key as tie-break, so the per-cell entry lists are identical for
//! any permutation of the input stream.

use std::collections::{BTreeMap, BTreeSet};

use crate::canonical::{canonical_bytes, sha256_hex, CanonicalValue};
use crate::cell::CellId;
use crate::config::{HgcParams, OnInvalid};
use crate::error::HgcError;
use crate::models::{InvalidSample, Sample, SampleEntry};

/// Declared sensor bounds, inclusive. Unknown fields pass through
/// unvalidated.
const SENSOR_RANGES: &[(&str, f64, f64)] = &[
    ("co2", 0.0, 10_000.0),
    ("pm25", 0.0, 1_000.0),
    ("temp", -90.0, 60.0),
    ("hum", 0.0, 100.0),
];

/// Result of the validation pass over one epoch's input.
#[derive(Debug, Default)]
pub struct ValidationOutput {
    /// Per-cell entry lists, timestamp-sorted.
    pub entries_by_cell: BTreeMap<CellId, Vec<SampleEntry>>,
    /// Per-cell aggregated sample counts (entry weights).
    pub sample_count_by_cell: BTreeMap<CellId, u64>,
    /// Side-channel of rejected samples (`mark` mode only).
    pub invalid: Vec<InvalidSample>,
    /// Samples rejected (any mode).
    pub rejected: u64,
    /// Samples dropped as duplicates of an earlier entry.
    pub duplicates: u64,
}

/// Validate, normalize, and deduplicate one epoch's samples.
pub fn validate_and_dedup(
    samples: &[Sample],
    params: &HgcParams,
    on_invalid: OnInvalid,
) -> Result<ValidationOutput, HgcError> {
    let mut out = ValidationOutput::default();
    let mut seen: BTreeMap<CellId, BTreeSet<String>> = BTreeMap::new();

    for sample in samples {
        let prepared = match prepare(sample, params, on_invalid, &mut out)? {
            Some(p) => p,
            None => continue,
        };

        let keys = seen.entry(prepared.cell).or_default();
        if !keys.insert(prepared.entry.dedup_key.clone()) {
            out.duplicates += 1;
            continue;
        }
        *out.sample_count_by_cell.entry(prepared.cell).or_insert(0) += prepared.entry.weight;
        out.entries_by_cell
            .entry(prepared.cell)
            .or_default()
            .push(prepared.entry);
    }

    for entries in out.entries_by_cell.values_mut() {
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.dedup_key.cmp(&b.dedup_key))
        });
    }

    Ok(out)
}

struct Prepared {
    cell: CellId,
    entry: SampleEntry,
}

/// Validate and normalize one sample. `Ok(None)` means the sample was
/// rejected and the mode allowed the run to continue.
fn prepare(
    sample: &Sample,
    params: &HgcParams,
    on_invalid: OnInvalid,
    out: &mut ValidationOutput,
) -> Result<Option<Prepared>, HgcError> {
    let mut sample = sample.clone();

    // Inner samples first: the mode applies recursively, and in `mark` /
    // `discard` modes a bad inner reading is removed without rejecting the
    // outer sample.
    if let Some(inner) = sample.samples.take() {
        let mut kept = Vec::with_capacity(inner.len());
        for inner_sample in inner {
            match check_readings(&inner_sample) {
                Ok(()) => kept.push(inner_sample),
                Err(reason) => {
                    out.rejected += 1;
                    match on_invalid {
                        OnInvalid::Throw => {
                            return Err(HgcError::validation(reason));
                        }
                        OnInvalid::Mark => out.invalid.push(InvalidSample {
                            reason,
                            sample: serde_json::to_value(&inner_sample)
                                .unwrap_or(serde_json::Value::Null),
                        }),
                        OnInvalid::Discard => {}
                    }
                }
            }
        }
        sample.samples = Some(kept);
    }

    match check_sample(&sample, params) {
        Ok(cell) => {
            sample.geo_cell_id = Some(cell.to_string());
            Ok(Some(Prepared {
                cell,
                entry: build_entry(&sample)?,
            }))
        }
        Err(reason) => {
            out.rejected += 1;
            match on_invalid {
                OnInvalid::Throw => Err(HgcError::validation(reason)),
                OnInvalid::Mark => {
                    out.invalid.push(InvalidSample {
                        reason,
                        sample: serde_json::to_value(&sample).unwrap_or(serde_json::Value::Null),
                    });
                    Ok(None)
                }
                OnInvalid::Discard => Ok(None),
            }
        }
    }
}

/// Full check for a top-level sample: cell validity, normalizability, and
/// sensor ranges. Returns the normalized base-res cell.
fn check_sample(sample: &Sample, params: &HgcParams) -> Result<CellId, String> {
    let raw = sample
        .geo_cell_id
        .as_deref()
        .ok_or_else(|| "missing geoCellId".to_string())?;
    let cell = CellId::parse(raw).map_err(|e| format!("invalid cell '{}': {}", raw, e))?;
    if cell.resolution() < params.base_res {
        return Err(format!(
            "cell '{}' is coarser (res {}) than base res {}",
            raw,
            cell.resolution(),
            params.base_res
        ));
    }
    let normalized = cell
        .to_parent(params.base_res)
        .map_err(|e| format!("cannot normalize cell '{}': {}", raw, e))?;
    check_readings(sample)?;
    Ok(normalized)
}

/// Range-check the known sensor fields of one sample.
fn check_readings(sample: &Sample) -> Result<(), String> {
    for (field, lo, hi) in SENSOR_RANGES {
        if let Some(value) = sample.readings.get(*field) {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("{} is not a number: {}", field, value))?;
            if n < *lo || n > *hi {
                return Err(format!("{} out of range: {}", field, n));
            }
        }
    }
    Ok(())
}

/// Build the deduplicated entry for a normalized sample.
///
/// The dedup key prefers `"{issuer}-{timestamp}"`; samples lacking either
/// fall back to the canonical content hash of the whole normalized sample
/// (including the cell id). The stored entry value excludes `geoCellId`
/// because the cell is the bucket key.
fn build_entry(sample: &Sample) -> Result<SampleEntry, HgcError> {
    let full = serde_json::to_value(sample)
        .map_err(|e| HgcError::encode(format!("sample serialization failed: {}", e)))?;

    let dedup_key = match (&sample.issuer, sample.timestamp) {
        (Some(issuer), Some(ts)) => format!("{}-{}", issuer, ts),
        _ => {
            let canonical = CanonicalValue::from_json(&full)?;
            sha256_hex(&canonical_bytes(&canonical)?)
        }
    };

    let mut obj = full;
    if let serde_json::Value::Object(ref mut fields) = obj {
        fields.remove("geoCellId");
    }
    let value = CanonicalValue::from_json(&obj)?;

    let weight = match &sample.samples {
        Some(inner) => inner.len() as u64,
        None => 1,
    };

    Ok(SampleEntry {
        timestamp: sample.timestamp.unwrap_or(0),
        dedup_key,
        weight,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_params, ParamOverrides, ParamsConfig};
    use serde_json::json;

    fn params() -> HgcParams {
        resolve_params(
            &ParamsConfig::default(),
            &BTreeMap::new(),
            &ParamOverrides::default(),
            0,
        )
        .unwrap()
    }

    fn cell_at(res: u8) -> String {
        CellId::new(5, &vec![1; res as usize]).unwrap().to_string()
    }

    fn sample(cell: &str, fields: serde_json::Value) -> Sample {
        let mut obj = fields;
        obj.as_object_mut()
            .unwrap()
            .insert("geoCellId".to_string(), json!(cell));
        serde_json::from_value(obj).unwrap()
    }

    #[test]
    fn issuer_timestamp_duplicates_collapse() {
        let c = cell_at(8);
        let samples = vec![
            sample(&c, json!({"issuer": "a", "timestamp": 5, "pm25": 2})),
            sample(&c, json!({"issuer": "a", "timestamp": 5, "pm25": 2})),
        ];
        let out = validate_and_dedup(&samples, &params(), OnInvalid::Throw).unwrap();
        let cell = CellId::parse(&c).unwrap();
        assert_eq!(out.entries_by_cell[&cell].len(), 1);
        assert_eq!(out.duplicates, 1);
    }

    #[test]
    fn identical_payloads_without_identity_collapse() {
        let c = cell_at(8);
        let samples = vec![
            sample(&c, json!({"pm25": 1})),
            sample(&c, json!({"pm25": 1})),
            sample(&c, json!({"pm25": 1})),
        ];
        let out = validate_and_dedup(&samples, &params(), OnInvalid::Throw).unwrap();
        let cell = CellId::parse(&c).unwrap();
        assert_eq!(out.entries_by_cell[&cell].len(), 1);
        assert_eq!(out.duplicates, 2);
    }

    #[test]
    fn finer_cells_normalize_to_base_res() {
        let fine = CellId::new(5, &[1, 1, 1, 1, 1, 1, 1, 1, 2, 3]).unwrap();
        let samples = vec![sample(&fine.to_string(), json!({"pm25": 1}))];
        let out = validate_and_dedup(&samples, &params(), OnInvalid::Throw).unwrap();
        let expected = fine.to_parent(8).unwrap();
        assert!(out.entries_by_cell.contains_key(&expected));
    }

    #[test]
    fn out_of_range_throws_in_throw_mode() {
        let samples = vec![sample(&cell_at(8), json!({"pm25": -1}))];
        let err = validate_and_dedup(&samples, &params(), OnInvalid::Throw).unwrap_err();
        assert!(matches!(err, HgcError::Validation { .. }));
    }

    #[test]
    fn mark_mode_collects_discard_mode_drops() {
        let samples = vec![
            sample(&cell_at(8), json!({"pm25": -1})),
            sample(&cell_at(8), json!({"pm25": 1})),
        ];
        let marked = validate_and_dedup(&samples, &params(), OnInvalid::Mark).unwrap();
        assert_eq!(marked.invalid.len(), 1);
        assert!(marked.invalid[0].reason.contains("pm25"));
        assert_eq!(marked.entries_by_cell.len(), 1);

        let discarded = validate_and_dedup(&samples, &params(), OnInvalid::Discard).unwrap();
        assert!(discarded.invalid.is_empty());
        assert_eq!(discarded.rejected, 1);
        assert_eq!(discarded.entries_by_cell.len(), 1);
    }

    #[test]
    fn invalid_inner_sample_is_handled_recursively() {
        let c = cell_at(8);
        let s = sample(
            &c,
            json!({
                "timestamp": 9,
                "issuer": "n1",
                "samples": [
                    {"geoCellId": c, "pm25": 1},
                    {"geoCellId": c, "pm25": 5000}
                ]
            }),
        );
        let err = validate_and_dedup(std::slice::from_ref(&s), &params(), OnInvalid::Throw)
            .unwrap_err();
        assert!(matches!(err, HgcError::Validation { .. }));

        let marked =
            validate_and_dedup(std::slice::from_ref(&s), &params(), OnInvalid::Mark).unwrap();
        assert_eq!(marked.invalid.len(), 1);
        let cell = CellId::parse(&c).unwrap();
        // Outer sample survives with the bad inner reading removed.
        assert_eq!(marked.entries_by_cell[&cell].len(), 1);
        assert_eq!(marked.sample_count_by_cell[&cell], 1);
    }

    #[test]
    fn entries_sort_by_timestamp_regardless_of_arrival() {
        let c = cell_at(8);
        let forward = vec![
            sample(&c, json!({"issuer": "a", "timestamp": 1, "pm25": 1})),
            sample(&c, json!({"issuer": "a", "timestamp": 2, "pm25": 2})),
        ];
        let reversed: Vec<Sample> = forward.iter().rev().cloned().collect();
        let a = validate_and_dedup(&forward, &params(), OnInvalid::Throw).unwrap();
        let b = validate_and_dedup(&reversed, &params(), OnInvalid::Throw).unwrap();
        let cell = CellId::parse(&c).unwrap();
        let ts_a: Vec<i64> = a.entries_by_cell[&cell].iter().map(|e| e.timestamp).collect();
        let ts_b: Vec<i64> = b.entries_by_cell[&cell].iter().map(|e| e.timestamp).collect();
        assert_eq!(ts_a, vec![1, 2]);
        assert_eq!(ts_a, ts_b);
    }

    #[test]
    fn weight_counts_inner_samples() {
        let c = cell_at(8);
        let s = sample(
            &c,
            json!({
                "issuer": "n", "timestamp": 1,
                "samples": [
                    {"geoCellId": c, "pm25": 1},
                    {"geoCellId": c, "pm25": 2},
                    {"geoCellId": c, "pm25": 3}
                ]
            }),
        );
        let out = validate_and_dedup(&[s], &params(), OnInvalid::Throw).unwrap();
        let cell = CellId::parse(&c).unwrap();
        assert_eq!(out.sample_count_by_cell[&cell], 3);
    }
}
