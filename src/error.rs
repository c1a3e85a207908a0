//! Error taxonomy for the compression core.
//!
//! The CLI and orchestration layer work in `anyhow::Result` and attach
//! context strings; the core subsystems (validation, hierarchy, encoding,
//! map merge) surface typed errors because callers dispatch on the kind:
//! `CellMapConflict` must leave the map file untouched, `Validation` is
//! governed by the configured invalid-sample mode, and so on.

use std::path::PathBuf;

use thiserror::Error;

/// Structured errors produced by the compression core.
#[derive(Debug, Error)]
pub enum HgcError {
    /// A sample failed validation: invalid cell id or out-of-range reading.
    #[error("invalid sample: {reason}")]
    Validation {
        /// Human-readable rejection reason, e.g. `"pm25 out of range: -1"`.
        reason: String,
    },

    /// The hex grid rejected a lookup (bad cell, impossible parent request).
    #[error("hierarchy lookup failed for cell '{cell}': {reason}")]
    Hierarchy { cell: String, reason: String },

    /// A value outside the canonical closed type reached the encoder.
    #[error("canonical encoding failed: {reason}")]
    Encode { reason: String },

    /// The cross-epoch map already assigns this cell to a different batch.
    #[error("cell map conflict in epoch {epoch}: cell {cell} is mapped to {existing}, refusing remap to {incoming}")]
    CellMapConflict {
        epoch: u64,
        cell: String,
        existing: String,
        incoming: String,
    },

    /// Another process holds the map lock; concurrent merges are disallowed.
    #[error("concurrent map merge detected: lock file {} exists", path.display())]
    ConcurrentMerge { path: PathBuf },

    /// Filesystem or sink failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed parameters (e.g. `min_res > base_res`).
    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl HgcError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HgcError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn encode(reason: impl Into<String>) -> Self {
        HgcError::Encode {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        HgcError::Validation {
            reason: reason.into(),
        }
    }
}
