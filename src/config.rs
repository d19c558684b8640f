//! Configuration management
//!
//! Settings come from a TOML file (path from `--config` / `SPREAD_CONFIG`),
//! with a few deployment values overridable from the environment (`.env` is
//! loaded first). Every section except `[[pools]]` has defaults.
//!
//! The detector and tracker sections are re-read on SIGHUP.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::arbitrage::{DetectorConfig, ExecutionCostModel, OptimizerConfig, TrackerConfig};
use crate::ingest::PoolCatalogEntry;
use crate::oracle::{DEFAULT_HERMES_ENDPOINT, SOL_USD_FEED_ID};
use crate::types::PoolMetadata;

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct SpreadConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub execution_cost: ExecutionCostModel,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pools: Vec<PoolCatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    /// Per-pool state older than `latest_slot - retention_slots` is pruned
    #[serde(default = "default_retention_slots")]
    pub retention_slots: u64,
}

fn default_retention_slots() -> u64 { 1_500 }

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { retention_slots: default_retention_slots() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_oracle_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_feed_id")]
    pub feed_id: String,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Price served until the first successful fetch (0 if unset)
    pub fallback_price: Option<f64>,
}

fn default_true() -> bool { true }
fn default_oracle_endpoint() -> String { DEFAULT_HERMES_ENDPOINT.to_string() }
fn default_feed_id() -> String { SOL_USD_FEED_ID.to_string() }
fn default_refresh_secs() -> u64 { 5 }
fn default_timeout_secs() -> u64 { 15 }

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_oracle_endpoint(),
            feed_id: default_feed_id(),
            refresh_secs: default_refresh_secs(),
            timeout_secs: default_timeout_secs(),
            fallback_price: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_spread_log_dir")]
    pub spread_log_dir: PathBuf,
    #[serde(default = "default_candidate_log")]
    pub candidate_log: PathBuf,
}

fn default_log_level() -> String { "info".to_string() }
fn default_spread_log_dir() -> PathBuf { PathBuf::from("logs") }
fn default_candidate_log() -> PathBuf { PathBuf::from("logs/candidates.jsonl") }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            spread_log_dir: default_spread_log_dir(),
            candidate_log: default_candidate_log(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_channel_capacity")]
    pub update_channel_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub candidate_channel_capacity: usize,
    /// Eviction sweep interval
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

fn default_channel_capacity() -> usize { 512 }
fn default_maintenance_interval() -> u64 { 10 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_channel_capacity: default_channel_capacity(),
            candidate_channel_capacity: default_channel_capacity(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl SpreadConfig {
    /// Load, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// ORACLE_ENDPOINT, ORACLE_FEED_ID, SPREAD_LOG_DIR
    pub fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("ORACLE_ENDPOINT") {
            self.oracle.endpoint = endpoint;
        }
        if let Ok(feed_id) = std::env::var("ORACLE_FEED_ID") {
            self.oracle.feed_id = feed_id;
        }
        if let Ok(dir) = std::env::var("SPREAD_LOG_DIR") {
            self.logging.spread_log_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if !(d.noise_floor_bps >= 0.0) || !d.noise_floor_bps.is_finite() {
            bail!("detector.noise_floor_bps must be a non-negative number");
        }
        if !(d.probe_depth_fraction > 0.0 && d.probe_depth_fraction < 1.0) {
            bail!("detector.probe_depth_fraction must be in (0, 1)");
        }

        let c = &self.execution_cost;
        if !(c.base_tx_fee >= 0.0 && c.priority_fee >= 0.0) || !c.fee_in_reference().is_finite() {
            bail!("execution_cost fees must be non-negative numbers");
        }

        if self.optimizer.max_iterations == 0 {
            bail!("optimizer.max_iterations must be at least 1");
        }

        if !self.tracker.min_net_usd.is_finite() {
            bail!("tracker.min_net_usd must be finite");
        }
        if self.tracker.max_entries == 0 {
            bail!("tracker.max_entries must be at least 1");
        }

        if self.oracle.enabled && self.oracle.refresh_secs == 0 {
            bail!("oracle.refresh_secs must be at least 1");
        }

        if self.engine.update_channel_capacity == 0 || self.engine.candidate_channel_capacity == 0 {
            bail!("engine channel capacities must be at least 1");
        }
        if self.engine.maintenance_interval_secs == 0 {
            bail!("engine.maintenance_interval_secs must be at least 1");
        }

        self.pool_metadata().map(|_| ())
    }

    /// Validated pool catalog. Fails on an empty catalog or duplicate addresses.
    pub fn pool_metadata(&self) -> Result<Vec<PoolMetadata>> {
        if self.pools.is_empty() {
            bail!("No [[pools]] configured");
        }

        let mut seen = HashSet::new();
        let mut metas = Vec::with_capacity(self.pools.len());
        for entry in &self.pools {
            let meta = PoolMetadata::try_from(entry)
                .with_context(|| format!("Invalid pool entry {}", entry.address))?;
            if !seen.insert(meta.address.clone()) {
                bail!("Duplicate pool address {}", meta.address);
            }
            metas.push(meta);
        }
        Ok(metas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurveType;

    const MINIMAL: &str = r#"
[[pools]]
address = "58oQChx4yWmvKdwLLZzBi4ChoCc2fqCUWBkwMihLYQo2"
type = "cpmm"
base_mint = "So11111111111111111111111111111111111111112"
quote_mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
base_decimals = 9
quote_decimals = 6
fee_rate = 0.0025

[[pools]]
address = "8sLbNZoA1cfnvMJLPfp98ZLAnFSYCFApfJKMbiXNLwxj"
type = "clmm"
base_mint = "So11111111111111111111111111111111111111112"
quote_mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
base_decimals = 9
quote_decimals = 6
fee_numerator = 4
fee_denominator = 10000
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = SpreadConfig::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.detector.noise_floor_bps, 0.5);
        assert_eq!(config.detector.probe_depth_fraction, 0.0005);
        assert!(config.detector.optimize);
        assert_eq!(config.execution_cost.base_tx_fee, 0.000005);
        assert_eq!(config.execution_cost.priority_fee, 0.00002);
        assert_eq!(config.optimizer.max_iterations, 80);
        assert_eq!(config.tracker.min_persistence_ms, 50);
        assert_eq!(config.tracker.min_occurrences, 2);
        assert_eq!(config.tracker.min_net_usd, 5.0);
        assert_eq!(config.oracle.refresh_secs, 5);
        assert_eq!(config.oracle.timeout_secs, 15);
        assert_eq!(config.logging.level, "info");

        let metas = config.pool_metadata().unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[1].curve_type, CurveType::ConcentratedLiquidity);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = SpreadConfig::from_toml(include_str!("../config/spread.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.pool_metadata().unwrap().len(), 2);
        assert_eq!(config.oracle.fallback_price, Some(150.0));
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml_str = format!(
            r#"
[detector]
noise_floor_bps = 2.0
optimize = false

[tracker]
min_net_usd = 10.0

[oracle]
enabled = false
fallback_price = 150.0
{}"#,
            MINIMAL
        );
        let config = SpreadConfig::from_toml(&toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.detector.noise_floor_bps, 2.0);
        assert!(!config.detector.optimize);
        assert_eq!(config.tracker.min_net_usd, 10.0);
        assert_eq!(config.tracker.min_occurrences, 2);
        assert!(!config.oracle.enabled);
        assert_eq!(config.oracle.fallback_price, Some(150.0));
    }

    #[test]
    fn test_empty_catalog_is_fatal() {
        let config = SpreadConfig::from_toml("[detector]\nnoise_floor_bps = 1.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_pool_rejected() {
        let dup = format!("{}\n{}", MINIMAL, &MINIMAL[..MINIMAL.find("[[pools]]\naddress = \"8s").unwrap()]);
        let config = SpreadConfig::from_toml(&dup).unwrap();
        let err = config.pool_metadata().unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let toml_str = format!("[detector]\nprobe_depth_fraction = 1.5\n{}", MINIMAL);
        let config = SpreadConfig::from_toml(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(SpreadConfig::load("/nonexistent/spread.toml").is_err());
    }
}
