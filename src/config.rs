use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cell::MAX_RES;
use crate::error::HgcError;

/// Effective compression parameters for one epoch run.
///
/// Computed once at run start from tier defaults, the config file, `HGC_*`
/// environment variables, and CLI flags (in that order of increasing
/// precedence), then passed explicitly through every layer and recorded on
/// every batch so downstream verifiers can reproduce compression decisions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HgcParams {
    /// Target leaf resolution; all samples normalize to this.
    pub base_res: u8,
    /// Coarsest resolution of the top-down walk.
    pub min_res: u8,
    /// Hard budget for leaf count per batch.
    pub max_leaves_per_batch: u64,
    /// Hard budget for aggregated sample count per batch.
    pub max_samples_per_batch: u64,
    /// Lower coalescing tolerance. Parsed and recorded; no coalescing is
    /// activated while it is <= 1.
    pub hysteresis_near: f64,
    /// Upper tolerance applied in the subtree fit test.
    pub hysteresis_far: f64,
    /// The scalar that selected the budget tier.
    pub volume: u64,
}

/// What to do with a sample that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnInvalid {
    /// Fail the epoch on the first invalid sample.
    #[default]
    Throw,
    /// Collect invalid samples on a side-channel and continue.
    Mark,
    /// Drop invalid samples silently.
    Discard,
}

impl OnInvalid {
    pub fn parse(s: &str) -> Result<OnInvalid> {
        match s {
            "throw" => Ok(OnInvalid::Throw),
            "mark" => Ok(OnInvalid::Mark),
            "discard" => Ok(OnInvalid::Discard),
            other => anyhow::bail!(
                "Unknown on-invalid mode: '{}'. Must be throw, mark, or discard.",
                other
            ),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub params: ParamsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./out")
}

/// Parameter overrides from the config file. Everything is optional;
/// unset fields fall through to the volume tier defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ParamsConfig {
    pub base_res: Option<u8>,
    pub min_res: Option<u8>,
    pub max_leaves_per_batch: Option<u64>,
    pub max_samples_per_batch: Option<u64>,
    pub hysteresis_near: Option<f64>,
    pub hysteresis_far: Option<f64>,
    pub volume: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub on_invalid: OnInvalid,
}

/// Load the TOML config. A missing file yields the defaults so the CLI is
/// usable with flags alone; a present-but-broken file is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}

/// Budget tier selected by the `volume` hint.
///
/// Pure function of the scalar: < 5,000 samples is the small tier, < 50,000
/// the medium tier, everything above the large tier.
fn tier_budgets(volume: u64) -> (u64, u64) {
    if volume < 5_000 {
        (100, 2_000)
    } else if volume < 50_000 {
        (250, 10_000)
    } else {
        (500, 50_000)
    }
}

/// CLI-level parameter overrides (highest precedence).
#[derive(Debug, Clone, Default)]
pub struct ParamOverrides {
    pub base_res: Option<u8>,
    pub min_res: Option<u8>,
    pub max_leaves_per_batch: Option<u64>,
    pub max_samples_per_batch: Option<u64>,
    pub hysteresis_near: Option<f64>,
    pub hysteresis_far: Option<f64>,
    pub volume: Option<u64>,
}

fn env_parse<T: std::str::FromStr>(env: &BTreeMap<String, String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}='{}': {}", key, raw, e)),
    }
}

/// Capture the `HGC_*` environment once so resolution stays a pure function
/// of its inputs.
pub fn capture_env() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| {
            k.starts_with("HGC_") || k == "N_SAMPLES" || k == "NUM_NODES" || k == "RNG_SEED"
        })
        .collect()
}

/// Resolve the effective parameter set.
///
/// `default_volume` is used when no layer sets `volume` explicitly; the
/// caller passes the post-parse sample count so the tier reflects the
/// actual load.
pub fn resolve_params(
    file: &ParamsConfig,
    env: &BTreeMap<String, String>,
    cli: &ParamOverrides,
    default_volume: u64,
) -> Result<HgcParams> {
    let volume = cli
        .volume
        .or(env_parse(env, "HGC_VOLUME")?)
        .or(file.volume)
        .unwrap_or(default_volume);
    let (tier_leaves, tier_samples) = tier_budgets(volume);

    let params = HgcParams {
        base_res: cli
            .base_res
            .or(env_parse(env, "HGC_BASE_RES")?)
            .or(file.base_res)
            .unwrap_or(8),
        min_res: cli
            .min_res
            .or(env_parse(env, "HGC_MIN_RES")?)
            .or(file.min_res)
            .unwrap_or(0),
        max_leaves_per_batch: cli
            .max_leaves_per_batch
            .or(env_parse(env, "HGC_MAX_LEAVES_PER_BATCH")?)
            .or(file.max_leaves_per_batch)
            .unwrap_or(tier_leaves),
        max_samples_per_batch: cli
            .max_samples_per_batch
            .or(env_parse(env, "HGC_MAX_SAMPLES_PER_BATCH")?)
            .or(file.max_samples_per_batch)
            .unwrap_or(tier_samples),
        hysteresis_near: cli
            .hysteresis_near
            .or(env_parse(env, "HGC_HYSTERESIS_NEAR")?)
            .or(file.hysteresis_near)
            .unwrap_or(0.9),
        hysteresis_far: cli
            .hysteresis_far
            .or(env_parse(env, "HGC_HYSTERESIS_FAR")?)
            .or(file.hysteresis_far)
            .unwrap_or(1.1),
        volume,
    };

    validate_params(&params)?;
    Ok(params)
}

fn validate_params(p: &HgcParams) -> Result<()> {
    let reason = if p.base_res > MAX_RES {
        Some(format!("base_res must be <= {}", MAX_RES))
    } else if p.min_res > p.base_res {
        Some(format!(
            "min_res ({}) must be <= base_res ({})",
            p.min_res, p.base_res
        ))
    } else if p.max_leaves_per_batch == 0 {
        Some("max_leaves_per_batch must be > 0".to_string())
    } else if p.max_samples_per_batch == 0 {
        Some("max_samples_per_batch must be > 0".to_string())
    } else if !(p.hysteresis_near > 0.0 && p.hysteresis_near <= 1.0) {
        Some("hysteresis_near must be in (0.0, 1.0]".to_string())
    } else if p.hysteresis_far < 1.0 {
        Some("hysteresis_far must be >= 1.0".to_string())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(HgcError::Config { reason }.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tier_defaults_follow_volume() {
        let file = ParamsConfig::default();
        let env = BTreeMap::new();
        let cli = ParamOverrides::default();

        let small = resolve_params(&file, &env, &cli, 100).unwrap();
        assert_eq!(small.max_leaves_per_batch, 100);
        assert_eq!(small.max_samples_per_batch, 2_000);

        let medium = resolve_params(&file, &env, &cli, 10_000).unwrap();
        assert_eq!(medium.max_leaves_per_batch, 250);

        let large = resolve_params(&file, &env, &cli, 80_000).unwrap();
        assert_eq!(large.max_samples_per_batch, 50_000);
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let file = ParamsConfig {
            base_res: Some(6),
            ..Default::default()
        };
        let env = env_of(&[("HGC_BASE_RES", "7")]);
        let mut cli = ParamOverrides::default();

        let p = resolve_params(&file, &env, &cli, 0).unwrap();
        assert_eq!(p.base_res, 7);

        cli.base_res = Some(9);
        let p = resolve_params(&file, &env, &cli, 0).unwrap();
        assert_eq!(p.base_res, 9);
    }

    #[test]
    fn min_res_above_base_res_rejected() {
        let file = ParamsConfig {
            base_res: Some(4),
            min_res: Some(5),
            ..Default::default()
        };
        let err = resolve_params(&file, &BTreeMap::new(), &ParamOverrides::default(), 0)
            .unwrap_err();
        assert!(err.to_string().contains("min_res"));
    }

    #[test]
    fn malformed_env_is_an_error() {
        let env = env_of(&[("HGC_MAX_LEAVES_PER_BATCH", "lots")]);
        let err = resolve_params(
            &ParamsConfig::default(),
            &env,
            &ParamOverrides::default(),
            0,
        )
        .unwrap_err();
        assert!(err.to_string().contains("HGC_MAX_LEAVES_PER_BATCH"));
    }

    #[test]
    fn hysteresis_bounds_enforced() {
        let file = ParamsConfig {
            hysteresis_near: Some(1.2),
            ..Default::default()
        };
        assert!(
            resolve_params(&file, &BTreeMap::new(), &ParamOverrides::default(), 0).is_err()
        );
        let file = ParamsConfig {
            hysteresis_far: Some(0.5),
            ..Default::default()
        };
        assert!(
            resolve_params(&file, &BTreeMap::new(), &ParamOverrides::default(), 0).is_err()
        );
    }

    #[test]
    fn on_invalid_parse() {
        assert_eq!(OnInvalid::parse("mark").unwrap(), OnInvalid::Mark);
        assert!(OnInvalid::parse("explode").is_err());
    }
}
