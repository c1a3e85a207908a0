//! Sorted-pair Merkle trees over keccak-256.
//!
//! Leaves are `keccak256(key ‖ ':' ‖ canonical(value))` over the data
//! object's keys in code-point order. Each internal node hashes its two
//! children with the child hashes sorted ascending as byte strings before
//! concatenation, and an odd trailing node is promoted unchanged. Sorting
//! the pair makes the root insensitive to sibling order, which together
//! with the canonical encoding gives the permutation-stability the epoch
//! commitments rely on.
//!
//! The same tree shape is used per batch (over cell keys) and at epoch
//! level (over `keccak256(geoBatchId ‖ merkleRoot)` leaves).
//!
//! Record hashes elsewhere use SHA-256; the two hash functions are distinct
//! on purpose and must not be unified.

use std::collections::BTreeMap;

use sha3::{Digest, Keccak256};

use crate::canonical::{canonical_bytes, CanonicalValue};
use crate::error::HgcError;

/// Result of building a batch-level tree: the root and each key's leaf
/// position in the sorted key list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleOutput {
    /// Lowercase hex root. For a single leaf this is that leaf's hash.
    pub root: String,
    /// `leaves_index[k]` = position of `k` in the sorted key list.
    pub leaves_index: BTreeMap<String, u64>,
}

/// keccak-256 of a byte string.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn leaf_hash(key: &str, value: &CanonicalValue) -> Result<[u8; 32], HgcError> {
    let payload = canonical_bytes(value)?;
    let mut buf = Vec::with_capacity(key.len() + 1 + payload.len());
    buf.extend_from_slice(key.as_bytes());
    buf.push(b':');
    buf.extend_from_slice(&payload);
    Ok(keccak256(&buf))
}

/// Reduce a level of hashes to the root with sorted pairs.
///
/// An empty level reduces to `keccak256("")` so an epoch with no batches
/// still commits to a well-defined constant.
fn reduce(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    if level.is_empty() {
        return keccak256(b"");
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        let mut i = 0;
        while i < level.len() {
            if i + 1 < level.len() {
                let (lo, hi) = if level[i] <= level[i + 1] {
                    (level[i], level[i + 1])
                } else {
                    (level[i + 1], level[i])
                };
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&lo);
                buf[32..].copy_from_slice(&hi);
                next.push(keccak256(&buf));
            } else {
                next.push(level[i]);
            }
            i += 2;
        }
        level = next;
    }
    level[0]
}

fn hex(bytes: &[u8; 32]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build the batch tree over a `cell → entries` data object.
pub fn build_from_data(
    data: &BTreeMap<String, CanonicalValue>,
) -> Result<MerkleOutput, HgcError> {
    let mut leaves = Vec::with_capacity(data.len());
    let mut leaves_index = BTreeMap::new();
    for (pos, (key, value)) in data.iter().enumerate() {
        leaves.push(leaf_hash(key, value)?);
        leaves_index.insert(key.clone(), pos as u64);
    }
    Ok(MerkleOutput {
        root: hex(&reduce(leaves)),
        leaves_index,
    })
}

/// Epoch super-root over `(geoBatchId, merkleRoot)` pairs.
///
/// The caller passes the pairs already sorted by batch id; leaves are
/// `keccak256(id ‖ root)` over the string forms.
pub fn super_root(pairs: &[(String, String)]) -> String {
    let leaves = pairs
        .iter()
        .map(|(id, root)| {
            let mut buf = Vec::with_capacity(id.len() + root.len());
            buf.extend_from_slice(id.as_bytes());
            buf.extend_from_slice(root.as_bytes());
            keccak256(&buf)
        })
        .collect();
    hex(&reduce(leaves))
}
