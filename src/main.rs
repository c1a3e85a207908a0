//! # HGC CLI (`hgc`)
//!
//! The `hgc` binary drives the compression pipeline. It provides commands
//! for running an epoch, verifying persisted artifacts, generating
//! deterministic sample streams, and summarizing a base directory.
//!
//! ## Usage
//!
//! ```bash
//! hgc --config ./hgc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hgc run` | Compress one epoch of samples into batches + super-root |
//! | `hgc verify` | Recompute and check every hash in persisted artifacts |
//! | `hgc simulate` | Write a seeded deterministic sample stream to a file |
//! | `hgc stats` | Summarize epochs, batches, and map coverage |
//!
//! ## Examples
//!
//! ```bash
//! # Compress epoch 0 from a samples file
//! hgc run --epoch 0 --input samples.json --base-dir ./out
//!
//! # Compress a simulated stream with explicit budgets
//! hgc run --epoch 0 --simulate --n-samples 5000 --seed 7 \
//!     --max-leaves-per-batch 250
//!
//! # Verify everything under ./out
//! hgc verify --base-dir ./out
//! ```
//!
//! Parameters resolve in increasing precedence: volume-tier defaults, the
//! TOML config file, `HGC_*` environment variables, CLI flags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hgc::config::{self, OnInvalid, ParamOverrides};
use hgc::epoch::{run_epoch, RunOptions};
use hgc::models::Sample;
use hgc::persist;
use hgc::progress::ProgressMode;
use hgc::simulate::simulate;
use hgc::stats::run_stats;
use hgc::verify::verify_epoch_dir;

/// HGC — deterministic hierarchical geospatial compression of sensor
/// epochs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file falls back to built-in defaults so everything can
/// also be driven by flags and `HGC_*` environment variables alone.
#[derive(Parser)]
#[command(
    name = "hgc",
    about = "HGC — deterministic hierarchical geospatial compression of sensor epochs",
    version,
    long_about = "HGC ingests geo-tagged sensor readings for a fixed time window and produces \
    a deterministic, auditable, compressed representation: per-batch records with Merkle roots, \
    an epoch super-root, and a merged cross-epoch cell map."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./hgc.toml")]
    config: PathBuf,

    /// Base directory for persisted artifacts (overrides config).
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Shared parameter override flags for `run`.
#[derive(clap::Args, Debug, Default)]
struct ParamArgs {
    /// Target leaf resolution; all samples normalize to this.
    #[arg(long)]
    base_res: Option<u8>,

    /// Coarsest resolution of the top-down walk.
    #[arg(long)]
    min_res: Option<u8>,

    /// Hard budget for leaf count per batch.
    #[arg(long)]
    max_leaves_per_batch: Option<u64>,

    /// Hard budget for aggregated sample count per batch.
    #[arg(long)]
    max_samples_per_batch: Option<u64>,

    /// Lower coalescing tolerance (reserved; recorded on batches).
    #[arg(long)]
    hysteresis_near: Option<f64>,

    /// Upper tolerance applied in the subtree fit test.
    #[arg(long)]
    hysteresis_far: Option<f64>,

    /// Volume hint selecting the default budget tier.
    #[arg(long)]
    volume: Option<u64>,
}

impl ParamArgs {
    fn overrides(&self) -> ParamOverrides {
        ParamOverrides {
            base_res: self.base_res,
            min_res: self.min_res,
            max_leaves_per_batch: self.max_leaves_per_batch,
            max_samples_per_batch: self.max_samples_per_batch,
            hysteresis_near: self.hysteresis_near,
            hysteresis_far: self.hysteresis_far,
            volume: self.volume,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Compress one epoch of samples.
    ///
    /// Validates, deduplicates, and compresses the input, writes the batch
    /// and super-root records atomically, and merges the epoch's cell
    /// assignments into the cross-epoch map.
    Run {
        /// Epoch number (the window is epoch * 3,600,000 ms).
        #[arg(long)]
        epoch: u64,

        /// Path to a JSON file holding an array of samples.
        #[arg(long, conflicts_with = "simulate")]
        input: Option<PathBuf>,

        /// Generate the input stream with the built-in simulator.
        #[arg(long)]
        simulate: bool,

        /// Number of simulated samples (env: N_SAMPLES).
        #[arg(long)]
        n_samples: Option<u64>,

        /// Number of simulated nodes (env: NUM_NODES).
        #[arg(long)]
        num_nodes: Option<u64>,

        /// Simulator seed (env: RNG_SEED).
        #[arg(long)]
        seed: Option<u64>,

        /// What to do with invalid samples: throw, mark, or discard.
        #[arg(long)]
        on_invalid: Option<String>,

        /// Upload the epoch directory to the (mock) content store.
        #[arg(long)]
        upload: bool,

        /// Register each batch with the (mock) registry. Implies --upload.
        #[arg(long)]
        register: bool,

        /// Progress reporting: off, human, or json.
        #[arg(long)]
        progress: Option<String>,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Verify persisted artifacts.
    ///
    /// Recomputes the canonical hash and Merkle root of every batch file
    /// and the super-root record, and reports one line per file.
    Verify {
        /// Verify a single epoch instead of every epoch directory found.
        #[arg(long)]
        epoch: Option<u64>,
    },

    /// Write a seeded deterministic sample stream to a JSON file.
    Simulate {
        /// Epoch number the timestamps should fall into.
        #[arg(long, default_value_t = 0)]
        epoch: u64,

        /// Number of samples (env: N_SAMPLES).
        #[arg(long)]
        n_samples: Option<u64>,

        /// Number of nodes (env: NUM_NODES).
        #[arg(long)]
        num_nodes: Option<u64>,

        /// RNG seed (env: RNG_SEED).
        #[arg(long)]
        seed: Option<u64>,

        /// Output file path.
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Summarize the artifacts under the base directory.
    Stats,
}

fn env_u64(env: &std::collections::BTreeMap<String, String>, key: &str) -> Result<Option<u64>> {
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, raw, e)),
    }
}

fn load_samples(path: &PathBuf) -> Result<Vec<Sample>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse samples file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let base_dir = cli.base_dir.unwrap_or(cfg.storage.base_dir.clone());
    let env = config::capture_env();

    match cli.command {
        Commands::Run {
            epoch,
            input,
            simulate: use_simulator,
            n_samples,
            num_nodes,
            seed,
            on_invalid,
            upload,
            register,
            progress,
            params,
        } => {
            let on_invalid = match on_invalid {
                Some(s) => OnInvalid::parse(&s)?,
                None => cfg.run.on_invalid,
            };
            let progress_mode = match progress {
                Some(s) => ProgressMode::parse(&s)?,
                None => ProgressMode::default_for_tty(),
            };

            // Samples first: the volume tier defaults to the input size.
            let (samples, effective) = if use_simulator {
                let n = n_samples.or(env_u64(&env, "N_SAMPLES")?).unwrap_or(1_000);
                let nodes = num_nodes.or(env_u64(&env, "NUM_NODES")?).unwrap_or(50);
                let seed = seed.or(env_u64(&env, "RNG_SEED")?).unwrap_or(0);
                let effective =
                    config::resolve_params(&cfg.params, &env, &params.overrides(), n)?;
                (simulate(epoch, n, nodes, seed, &effective), effective)
            } else {
                let path = input
                    .ok_or_else(|| anyhow::anyhow!("run requires --input or --simulate"))?;
                let samples = load_samples(&path)?;
                let effective = config::resolve_params(
                    &cfg.params,
                    &env,
                    &params.overrides(),
                    samples.len() as u64,
                )?;
                (samples, effective)
            };
            let opts = RunOptions {
                on_invalid,
                upload: upload || register,
                register,
            };
            let outcome = run_epoch(
                &samples,
                epoch,
                &effective,
                &base_dir,
                &opts,
                progress_mode.reporter().as_ref(),
            )
            .await?;

            let s = &outcome.summary;
            println!("run epoch {}", epoch);
            println!("  samples in: {}", s.samples_in);
            println!("  rejected: {}", s.samples_rejected);
            println!("  deduplicated: {}", s.samples_deduplicated);
            println!("  cells: {}", s.cells);
            println!("  batches: {}", s.batches);
            println!("  samples total: {}", s.samples_total);
            println!("  super root: {}", outcome.super_root);
            println!("  map hash: {}", outcome.map_hash);
            if let Some(cid) = &outcome.cid {
                println!("  cid: {}", cid);
            }
            println!("  wrote: {}", outcome.epoch_dir.display());
            println!("ok");
        }

        Commands::Verify { epoch } => {
            let dirs = match epoch {
                Some(e) => vec![persist::epoch_dir(&base_dir, e)],
                None => {
                    let data = persist::data_dir(&base_dir);
                    let mut found = Vec::new();
                    if data.exists() {
                        for entry in std::fs::read_dir(&data)? {
                            let entry = entry?;
                            let name = entry.file_name().to_string_lossy().to_string();
                            if entry.file_type()?.is_dir() && name.starts_with("epoch_") {
                                found.push(entry.path());
                            }
                        }
                    }
                    found.sort();
                    found
                }
            };
            if dirs.is_empty() {
                anyhow::bail!("no epoch directories under {}", base_dir.display());
            }

            let mut all_ok = true;
            for dir in &dirs {
                let outcomes = verify_epoch_dir(dir)
                    .with_context(|| format!("verification failed for {}", dir.display()))?;
                println!("{}", dir.display());
                for o in &outcomes {
                    if o.ok {
                        println!("  ok    {}", o.file);
                    } else {
                        all_ok = false;
                        println!("  FAIL  {}  {}", o.file, o.detail);
                    }
                }
            }
            if !all_ok {
                anyhow::bail!("verification failed");
            }
            println!("ok");
        }

        Commands::Simulate {
            epoch,
            n_samples,
            num_nodes,
            seed,
            out,
            params,
        } => {
            let n = n_samples.or(env_u64(&env, "N_SAMPLES")?).unwrap_or(1_000);
            let nodes = num_nodes.or(env_u64(&env, "NUM_NODES")?).unwrap_or(50);
            let seed = seed.or(env_u64(&env, "RNG_SEED")?).unwrap_or(0);
            let effective = config::resolve_params(&cfg.params, &env, &params.overrides(), n)?;
            let samples = simulate(epoch, n, nodes, seed, &effective);
            let json = serde_json::to_string_pretty(&samples)?;
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, &json)?;
            eprintln!("Wrote {} samples to {}", samples.len(), out.display());
        }

        Commands::Stats => {
            run_stats(&base_dir)?;
        }
    }

    Ok(())
}
