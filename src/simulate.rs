//! Deterministic sample generation for local runs and benchmarks.
//!
//! Places `num_nodes` virtual sensors on the grid and draws `n_samples`
//! readings from them inside the epoch window. Everything derives from the
//! seeded RNG, so a given `(seed, n_samples, num_nodes, epoch, base_res)`
//! always produces the same sample vector. A slice of the stream
//! exercises the pipeline's edge paths on purpose: some samples arrive at
//! a finer resolution than the base and some carry neither issuer nor
//! timestamp, forcing hash-keyed deduplication.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cell::{CellId, MAX_RES, NUM_BASE_CELLS};
use crate::config::HgcParams;
use crate::models::{Sample, WINDOW_MS};

/// Generate a deterministic sample stream for one epoch.
pub fn simulate(
    epoch: u64,
    n_samples: u64,
    num_nodes: u64,
    seed: u64,
    params: &HgcParams,
) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let num_nodes = num_nodes.max(1);

    // Fixed node placements at base resolution.
    let mut node_cells = Vec::with_capacity(num_nodes as usize);
    for _ in 0..num_nodes {
        let base = rng.gen_range(0..NUM_BASE_CELLS);
        let digits: Vec<u8> = (0..params.base_res).map(|_| rng.gen_range(0..7)).collect();
        node_cells.push(CellId::new(base, &digits).expect("generated cell is valid"));
    }

    let epoch_start = (epoch * WINDOW_MS) as i64;
    let mut samples = Vec::with_capacity(n_samples as usize);
    for i in 0..n_samples {
        let node = rng.gen_range(0..num_nodes) as usize;
        let mut cell = node_cells[node];

        // Every 11th reading comes in at a finer resolution to exercise
        // normalization.
        if i % 11 == 10 && params.base_res < MAX_RES {
            let extra = rng.gen_range(0..7u8);
            cell = cell.child(extra).expect("child cell is valid");
        }

        let mut readings = BTreeMap::new();
        readings.insert(
            "pm25".to_string(),
            serde_json::json!(rng.gen_range(0..=150)),
        );
        readings.insert(
            "co2".to_string(),
            serde_json::json!(rng.gen_range(380..=2_000)),
        );
        readings.insert("temp".to_string(), serde_json::json!(rng.gen_range(-10..=35)));
        readings.insert("hum".to_string(), serde_json::json!(rng.gen_range(20..=95)));

        // Every 7th reading is anonymous and untimed, landing on the
        // canonical-hash dedup path.
        let anonymous = i % 7 == 6;
        samples.push(Sample {
            geo_cell_id: Some(cell.to_string()),
            timestamp: if anonymous {
                None
            } else {
                Some(epoch_start + rng.gen_range(0..WINDOW_MS as i64))
            },
            issuer: if anonymous {
                None
            } else {
                Some(format!("node-{:04}", node))
            },
            samples: None,
            readings,
        });
    }
    samples
}
