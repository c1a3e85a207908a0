//! Top-down hierarchical compressor.
//!
//! Walks the hex hierarchy from `min_res` toward `base_res`, grouping the
//! base-res leaf cells under common parents. A subtree is emitted as one
//! segment when it fits under both budgets scaled by the far hysteresis;
//! otherwise its children are regrouped one level deeper, packed into
//! chunks of whole child-groups under the plain budgets, and each chunk is
//! recursed. A recursion that reaches the base resolution stops without
//! partitioning: the cells there are indivisible, so the packed chunk is
//! emitted whole as one segment, over budget or not. That terminal case is
//! the only one where a batch may exceed the budgets.
//!
//! Ordering is fully deterministic: parent groups are visited in cell-id
//! order, packing never splits a child-group, and chunk order matches the
//! traversal order at that level. Given the same cells, counts, and
//! parameters the output segment list is identical for any host.

use std::collections::BTreeMap;

use crate::cell::CellId;
use crate::config::HgcParams;
use crate::error::HgcError;
use crate::models::Segment;

/// Partition the sorted base-res leaf cells into batch segments.
///
/// Segments are disjoint and cover `all_cells` exactly. Below the base
/// resolution a segment's cells share a single parent at the segment's
/// resolution; a base-res segment is a packed run of cells named by its
/// first cell.
pub fn compress(
    all_cells: &[CellId],
    sample_count_by_cell: &BTreeMap<CellId, u64>,
    params: &HgcParams,
) -> Result<Vec<Segment>, HgcError> {
    let mut segments = Vec::new();
    if all_cells.is_empty() {
        return Ok(segments);
    }
    walk(
        all_cells,
        params.min_res,
        sample_count_by_cell,
        params,
        &mut segments,
    )?;
    Ok(segments)
}

fn walk(
    cells: &[CellId],
    res: u8,
    counts: &BTreeMap<CellId, u64>,
    params: &HgcParams,
    out: &mut Vec<Segment>,
) -> Result<(), HgcError> {
    // Terminal case: base-res cells are indivisible, so the incoming set
    // (a packed chunk of sibling cells, or the whole input when the walk
    // starts at base res) is emitted as one segment, over budget or not.
    // No partitioning happens at this level.
    if res >= params.base_res {
        out.push(Segment {
            res: params.base_res,
            cells: cells.to_vec(),
        });
        return Ok(());
    }

    let max_leaves_far = params.max_leaves_per_batch as f64 * params.hysteresis_far;
    let max_samples_far = params.max_samples_per_batch as f64 * params.hysteresis_far;

    for (_, group) in group_by_parent(cells, res)? {
        let leaves = group.len() as f64;
        let volume = group_volume(&group, counts) as f64;
        if leaves <= max_leaves_far && volume <= max_samples_far {
            out.push(Segment { res, cells: group });
            continue;
        }

        // Too big at this level: regroup one level deeper and pack whole
        // child-groups into chunks under the plain budgets.
        let child_groups = group_by_parent(&group, res + 1)?;
        for chunk in pack_chunks(child_groups, counts, params) {
            walk(&chunk, res + 1, counts, params, out)?;
        }
    }
    Ok(())
}

/// Group cells by their ancestor at `res`, preserving cell order within
/// each group. `BTreeMap` iteration yields parents in cell-id order.
fn group_by_parent(
    cells: &[CellId],
    res: u8,
) -> Result<BTreeMap<CellId, Vec<CellId>>, HgcError> {
    let mut groups: BTreeMap<CellId, Vec<CellId>> = BTreeMap::new();
    for &cell in cells {
        groups.entry(cell.to_parent(res)?).or_default().push(cell);
    }
    Ok(groups)
}

fn group_volume(cells: &[CellId], counts: &BTreeMap<CellId, u64>) -> u64 {
    cells.iter().map(|c| counts.get(c).copied().unwrap_or(0)).sum()
}

/// Stable packing: concatenate whole child-groups into chunks, sealing the
/// current chunk when adding the next group would strictly exceed either
/// plain budget. A single oversized group forms its own chunk.
fn pack_chunks(
    child_groups: BTreeMap<CellId, Vec<CellId>>,
    counts: &BTreeMap<CellId, u64>,
    params: &HgcParams,
) -> Vec<Vec<CellId>> {
    let mut chunks = Vec::new();
    let mut current: Vec<CellId> = Vec::new();
    let mut current_leaves = 0u64;
    let mut current_samples = 0u64;

    for (_, group) in child_groups {
        let group_leaves = group.len() as u64;
        let group_samples = group_volume(&group, counts);
        let over = current_leaves + group_leaves > params.max_leaves_per_batch
            || current_samples + group_samples > params.max_samples_per_batch;
        if over && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_leaves = 0;
            current_samples = 0;
        }
        current.extend(group);
        current_leaves += group_leaves;
        current_samples += group_samples;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve_params, ParamOverrides, ParamsConfig};

    fn params_with(max_leaves: u64, max_samples: u64) -> HgcParams {
        resolve_params(
            &ParamsConfig {
                base_res: Some(8),
                min_res: Some(0),
                max_leaves_per_batch: Some(max_leaves),
                max_samples_per_batch: Some(max_samples),
                ..Default::default()
            },
            &BTreeMap::new(),
            &ParamOverrides::default(),
            0,
        )
        .unwrap()
    }

    fn leaf(base: u8, digits: [u8; 8]) -> CellId {
        CellId::new(base, &digits).unwrap()
    }

    fn uniform_counts(cells: &[CellId], n: u64) -> BTreeMap<CellId, u64> {
        cells.iter().map(|&c| (c, n)).collect()
    }

    fn flatten(segments: &[Segment]) -> Vec<CellId> {
        let mut cells: Vec<CellId> = segments.iter().flat_map(|s| s.cells.clone()).collect();
        cells.sort();
        cells
    }

    #[test]
    fn single_cell_compresses_to_min_res() {
        let cells = vec![leaf(9, [1, 2, 3, 0, 0, 0, 1, 2])];
        let counts = uniform_counts(&cells, 1);
        let segments = compress(&cells, &counts, &params_with(100, 2_000)).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].res, 0);
        assert_eq!(segments[0].cells, cells);
    }

    #[test]
    fn coverage_and_disjointness() {
        let mut cells = Vec::new();
        for base in [3u8, 3, 3, 40, 40, 99] {
            for d in 0..6u8 {
                cells.push(leaf(base, [d, 0, 1, 2, 0, 0, 0, d % 7]));
            }
        }
        cells.sort();
        cells.dedup();
        let counts = uniform_counts(&cells, 10);
        let segments = compress(&cells, &counts, &params_with(4, 2_000)).unwrap();
        assert_eq!(flatten(&segments), cells);
        let total: usize = segments.iter().map(|s| s.cells.len()).sum();
        assert_eq!(total, cells.len());
    }

    #[test]
    fn leaf_budget_forces_split() {
        // 12 leaves under one res-0 base cell with a budget of 4 must split
        // into multiple segments, each within the far-scaled budget.
        let mut cells = Vec::new();
        for d1 in 0..4u8 {
            for d2 in 0..3u8 {
                cells.push(leaf(7, [d1, d2, 0, 0, 0, 0, 0, 0]));
            }
        }
        cells.sort();
        let counts = uniform_counts(&cells, 1);
        let params = params_with(4, 2_000);
        let segments = compress(&cells, &counts, &params).unwrap();
        assert!(segments.len() > 1);
        for seg in &segments {
            assert!(
                seg.cells.len() as f64
                    <= params.max_leaves_per_batch as f64 * params.hysteresis_far
            );
        }
        assert_eq!(flatten(&segments), cells);
    }

    #[test]
    fn sample_budget_forces_split() {
        let cells: Vec<CellId> = (0..6u8)
            .map(|d| leaf(20, [d, 0, 0, 0, 0, 0, 0, 0]))
            .collect();
        let counts = uniform_counts(&cells, 1_000);
        let params = params_with(100, 2_000);
        let segments = compress(&cells, &counts, &params).unwrap();
        assert!(segments.len() > 1);
        for seg in &segments {
            let vol: u64 = seg.cells.iter().map(|c| counts[c]).sum();
            assert!(vol as f64 <= params.max_samples_per_batch as f64 * params.hysteresis_far);
        }
    }

    #[test]
    fn far_hysteresis_tolerates_overshoot() {
        // 110 samples in one subtree against a budget of 100 still fits
        // because 110 <= 100 * 1.1.
        let cells: Vec<CellId> = (0..2u8).map(|d| leaf(4, [d, 0, 0, 0, 0, 0, 0, 0])).collect();
        let mut counts = BTreeMap::new();
        counts.insert(cells[0], 60);
        counts.insert(cells[1], 50);
        let params = params_with(100, 100);
        let segments = compress(&cells, &counts, &params).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].res, 0);
    }

    #[test]
    fn packed_chunk_at_base_res_stays_one_batch() {
        // Three siblings share every ancestor up to base_res - 1 and differ
        // only in the final digit. A leaf budget of 2 fails the fit test at
        // every level above base res, so the walk descends all the way down
        // and packs the singletons into chunks of two. Each chunk must come
        // out as ONE multi-cell base-res segment, not shattered back into
        // singletons.
        let cells = vec![
            leaf(33, [1, 1, 1, 1, 1, 1, 1, 0]),
            leaf(33, [1, 1, 1, 1, 1, 1, 1, 1]),
            leaf(33, [1, 1, 1, 1, 1, 1, 1, 2]),
        ];
        let counts = uniform_counts(&cells, 1);
        let params = params_with(2, 2_000);
        let segments = compress(&cells, &counts, &params).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].res, params.base_res);
        assert_eq!(segments[0].cells, vec![cells[0], cells[1]]);
        assert_eq!(segments[1].res, params.base_res);
        assert_eq!(segments[1].cells, vec![cells[2]]);
        assert_eq!(flatten(&segments), cells);
    }

    #[test]
    fn oversized_base_cell_is_emitted_as_singleton() {
        let cells = vec![leaf(11, [0, 0, 0, 0, 0, 0, 0, 0])];
        let counts = uniform_counts(&cells, 1_000_000);
        let params = params_with(100, 2_000);
        let segments = compress(&cells, &counts, &params).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].res, params.base_res);
        assert_eq!(segments[0].cells.len(), 1);
    }

    #[test]
    fn segments_share_a_parent_at_their_res() {
        let mut cells = Vec::new();
        for d1 in 0..5u8 {
            for d2 in 0..5u8 {
                cells.push(leaf(61, [d1, d2, 1, 0, 0, 0, 0, 0]));
            }
        }
        cells.sort();
        let counts = uniform_counts(&cells, 3);
        let segments = compress(&cells, &counts, &params_with(6, 2_000)).unwrap();
        for seg in &segments {
            let parent = seg.cells[0].to_parent(seg.res).unwrap();
            for c in &seg.cells {
                assert_eq!(c.to_parent(seg.res).unwrap(), parent);
            }
        }
    }

    #[test]
    fn input_permutation_changes_nothing() {
        let mut cells = Vec::new();
        for d1 in 0..6u8 {
            for d2 in 0..4u8 {
                cells.push(leaf(88, [d1, d2, 2, 0, 5, 0, 0, 0]));
            }
        }
        cells.sort();
        let counts = uniform_counts(&cells, 7);
        let params = params_with(5, 100);
        let sorted = compress(&cells, &counts, &params).unwrap();
        // The contract takes sorted input; grouping is order-insensitive
        // regardless, so a reversed slice yields the same segments.
        let reversed: Vec<CellId> = cells.iter().rev().copied().collect();
        let from_reversed = compress(&reversed, &counts, &params).unwrap();
        let norm = |segs: &[Segment]| {
            let mut v: Vec<(u8, Vec<CellId>)> = segs
                .iter()
                .map(|s| {
                    let mut c = s.cells.clone();
                    c.sort();
                    (s.res, c)
                })
                .collect();
            v.sort();
            v
        };
        assert_eq!(norm(&sorted), norm(&from_reversed));
    }

    #[test]
    fn empty_input_yields_no_segments() {
        let segments =
            compress(&[], &BTreeMap::new(), &params_with(100, 2_000)).unwrap();
        assert!(segments.is_empty());
    }
}
