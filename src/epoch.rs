//! Epoch pipeline orchestration.
//!
//! Coordinates the full run for one epoch: validate → dedup → aggregate →
//! compress → assemble → super-root → persist → map merge → sinks.
//!
//! # Run pipeline
//!
//! 1. **Validate & dedup** — every sample is range-checked, normalized to
//!    the base resolution, and deduplicated per cell ([`crate::validate`]).
//! 2. **Compress** — the sorted leaf cells are partitioned into segments by
//!    the top-down walk ([`crate::compress`]).
//! 3. **Assemble** — each segment becomes a batch record with its Merkle
//!    root and canonical hash; the epoch super-root commits to all of them.
//! 4. **Stage** — all artifacts are written to a staging directory; the
//!    final epoch directory is untouched so far.
//! 5. **Merge** — under the map lock, the epoch's cell assignments are
//!    merged into the cross-epoch map. A conflict aborts here, before any
//!    file is finalized.
//! 6. **Commit** — the staging directory is renamed into place and the
//!    merged map is written atomically.
//! 7. **Sinks** — optionally upload the epoch directory and register each
//!    batch. Sink failures surface but local artifacts stay durable.
//!
//! Given the same samples and parameters, every byte of every produced
//! file is identical across runs and machines.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::assemble::{assemble_batch, build_super_root};
use crate::compress::compress;
use crate::config::{HgcParams, OnInvalid};
use crate::models::{Batch, EpochResult, EpochSummary, Sample};
use crate::persist;
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::sink::{BatchRegistry, FolderUploader, JsonlRegistry, MockUploader};
use crate::validate::validate_and_dedup;

/// Switches for one `hgc run` invocation.
pub struct RunOptions {
    pub on_invalid: OnInvalid,
    pub upload: bool,
    pub register: bool,
}

/// What a completed run reports back to the CLI.
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: EpochSummary,
    pub super_root: String,
    pub map_hash: String,
    pub epoch_dir: PathBuf,
    pub cid: Option<String>,
}

/// Compute an epoch's artifacts in memory, without touching the
/// filesystem. This is the deterministic core shared by `run` and the
/// tests.
pub fn compute_epoch(
    samples: &[Sample],
    epoch: u64,
    params: &HgcParams,
    on_invalid: OnInvalid,
    progress: &dyn RunProgressReporter,
) -> Result<EpochResult> {
    let total = samples.len() as u64;
    progress.report(RunProgressEvent::Validating { n: 0, total });
    let validated = validate_and_dedup(samples, params, on_invalid)
        .context("sample validation failed")?;
    progress.report(RunProgressEvent::Validating { n: total, total });

    let cells: Vec<_> = validated.entries_by_cell.keys().copied().collect();
    progress.report(RunProgressEvent::Compressing {
        cells: cells.len() as u64,
    });
    let segments = compress(&cells, &validated.sample_count_by_cell, params)
        .context("compression failed")?;

    let mut batches: Vec<Batch> = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        progress.report(RunProgressEvent::Hashing {
            n: i as u64,
            total: segments.len() as u64,
        });
        batches.push(
            assemble_batch(segment, &validated.entries_by_cell, epoch, params)
                .context("batch assembly failed")?,
        );
    }
    batches.sort_by(|a, b| a.geo_batch_id.cmp(&b.geo_batch_id));

    let mut cell_to_batch = std::collections::BTreeMap::new();
    for batch in &batches {
        for cell in &batch.compressed_from {
            cell_to_batch.insert(cell.clone(), batch.geo_batch_id.clone());
        }
    }

    let super_root = build_super_root(&batches, epoch, params);
    let summary = EpochSummary {
        samples_in: total,
        samples_rejected: validated.rejected,
        samples_deduplicated: validated.duplicates,
        cells: cells.len() as u64,
        batches: batches.len() as u64,
        samples_total: super_root.samples_total,
    };

    Ok(EpochResult {
        batches,
        cell_to_batch,
        super_root,
        summary,
        invalid_samples: validated.invalid,
    })
}

/// Run one epoch end to end: compute, persist, merge, and feed the sinks.
pub async fn run_epoch(
    samples: &[Sample],
    epoch: u64,
    params: &HgcParams,
    base_dir: &Path,
    opts: &RunOptions,
    progress: &dyn RunProgressReporter,
) -> Result<RunOutcome> {
    let result = compute_epoch(samples, epoch, params, opts.on_invalid, progress)?;

    progress.report(RunProgressEvent::Writing);
    let staging = persist::stage_epoch(
        base_dir,
        epoch,
        &result.batches,
        &result.super_root,
        &result.invalid_samples,
    )?;

    // The merge is checked under the lock before anything is finalized;
    // a conflict leaves both the map and the final epoch directory
    // untouched.
    let map_hash = {
        let _lock = persist::MapLock::acquire(base_dir)?;
        let mut map = persist::load_map(base_dir)?;
        if let Err(e) = persist::merge_into(&mut map, epoch, &result.cell_to_batch) {
            persist::discard_staging(&staging);
            return Err(e.into());
        }
        persist::commit_epoch(base_dir, epoch, &staging)?;
        persist::write_map(base_dir, &map)?
    };

    let epoch_dir = persist::epoch_dir(base_dir, epoch);

    let mut cid = None;
    if opts.upload {
        let uploaded = MockUploader
            .upload_folder(&epoch_dir)
            .await
            .context("folder upload failed")?;
        if opts.register {
            let registry = JsonlRegistry::new(base_dir);
            for batch in &result.batches {
                registry
                    .register_batch(epoch, &batch.geo_batch_id, &batch.merkle_root, &uploaded)
                    .await
                    .context("batch registration failed")?;
            }
        }
        cid = Some(uploaded);
    }

    Ok(RunOutcome {
        summary: result.summary,
        super_root: result.super_root.super_root.clone(),
        map_hash,
        epoch_dir,
        cid,
    })
}
