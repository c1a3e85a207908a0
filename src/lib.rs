//! # HGC
//!
//! **A deterministic hierarchical geospatial compressor for sensor epochs.**
//!
//! HGC ingests geo-tagged sensor readings for a fixed one-hour window (an
//! *epoch*) and produces a compressed, auditable representation: a set of
//! *geo batches* (hierarchically aggregated hex-grid cells carrying their
//! member readings and a Merkle root) plus an epoch-level *super-root*
//! committing to all of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────┐   ┌──────────┐
//! │ Samples  │──▶│ Validate + │──▶│ Top-down  │──▶│ Batches + │
//! │ (stream) │   │ Dedup      │   │ Compress  │   │ SuperRoot │
//! └──────────┘   └────────────┘   └───────────┘   └────┬─────┘
//!                                                      │
//!                                  ┌───────────────────┤
//!                                  ▼                   ▼
//!                            ┌──────────┐       ┌──────────┐
//!                            │  Files + │       │  Sinks   │
//!                            │ CellMap  │       │ CAS/Reg  │
//!                            └──────────┘       └──────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. Incoming [`models::Sample`]s are validated against sensor ranges and
//!    the grid ([`validate`]), normalized to the base resolution, and
//!    deduplicated per cell.
//! 2. The **compressor** ([`compress`]) walks the hex hierarchy top-down,
//!    grouping cells into the deepest batches that fit the leaf and sample
//!    budgets (with hysteresis).
//! 3. The **assembler** ([`assemble`]) builds one [`models::Batch`] per
//!    segment: canonical data table, keccak-256 sorted-pair Merkle root
//!    ([`merkle`]), SHA-256 record hash ([`canonical`]).
//! 4. The **super-root** commits to all batches of the epoch; artifacts are
//!    persisted atomically and the cross-epoch cell map is merged
//!    ([`persist`]).
//! 5. The **verifier** ([`verify`]) recomputes every hash from the files
//!    alone.
//!
//! Determinism is the contract: the same samples and parameters produce
//! byte-identical files on every host, under any input permutation.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Parameter resolution: tier defaults, TOML, env, CLI |
//! | [`error`] | Typed error taxonomy for the core |
//! | [`cell`] | Hex grid oracle: bit-packed cell ids, parents, geometry |
//! | [`canonical`] | Order-insensitive canonical encoding and SHA-256 hashing |
//! | [`merkle`] | keccak-256 sorted-pair Merkle trees |
//! | [`models`] | Core types: `Sample`, `Batch`, `SuperRootRecord`, maps |
//! | [`validate`] | Range checks, normalization, per-cell dedup |
//! | [`compress`] | Top-down hierarchical compressor |
//! | [`assemble`] | Batch assembly and epoch super-root |
//! | [`persist`] | Epoch staging, atomic commit, cross-epoch map merge |
//! | [`verify`] | Recompute-and-compare artifact verification |
//! | [`sink`] | Folder upload / batch registry traits with mock impls |
//! | [`simulate`] | Seeded deterministic sample generation |
//! | [`epoch`] | Pipeline orchestration |
//! | [`progress`] | Phase progress reporting on stderr |
//! | [`stats`] | Artifact directory summary |

pub mod assemble;
pub mod canonical;
pub mod cell;
pub mod compress;
pub mod config;
pub mod epoch;
pub mod error;
pub mod merkle;
pub mod models;
pub mod persist;
pub mod progress;
pub mod simulate;
pub mod sink;
pub mod stats;
pub mod validate;
pub mod verify;
