//! Configuration for the mining engine
//!
//! Loaded from TOML, then overridden by `FORGE_*` environment variables.
//! Every section has defaults, so an empty file is a valid configuration.

use crate::domain::builder::reward_op_cost;
use crate::domain::{
    ConsensusMode, KernelParams, RetargetConfig, SelectionConfig, SubsidySchedule,
};
use crate::error::{MiningError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration for the mining engine
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    /// Transaction selection budgets
    pub selection: SelectionConfig,

    /// PoW worker settings
    pub pow: PowConfig,

    /// PoS minter settings
    pub pos: PosConfig,

    /// PoA minter settings
    pub poa: PoaConfig,

    /// PoW retarget parameters
    pub pow_difficulty: RetargetConfig,

    /// PoS retarget parameters
    pub pos_difficulty: RetargetConfig,

    /// Block subsidy per mode
    pub subsidy: SubsidySchedule,

    /// Header version of produced blocks
    pub block_version: u32,

    /// Forward clock tolerance for header timestamps (seconds)
    pub max_future_drift_secs: u64,

    /// Hash-rate averaging window (seconds)
    pub hashrate_window_secs: u64,

    /// Log level for the binary (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            pow: PowConfig::default(),
            pos: PosConfig::default(),
            poa: PoaConfig::default(),
            pow_difficulty: RetargetConfig::default(),
            pos_difficulty: RetargetConfig::default(),
            subsidy: SubsidySchedule::default(),
            block_version: 1,
            max_future_drift_secs: crate::MAX_FUTURE_DRIFT_SECS,
            hashrate_window_secs: 60,
            log_level: "info".to_string(),
        }
    }
}

/// PoW configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    /// Start PoW workers at launch
    pub enabled: bool,

    /// Number of hashing threads (default: num_cpus)
    pub threads: usize,

    /// Nonces tried between checks for a new tip or a stop request
    pub hash_batch: u64,

    /// Seconds between header timestamp refreshes
    pub time_update_secs: u64,

    /// Milliseconds to wait before retrying when no template can be built
    pub retry_delay_ms: u64,

    /// Wait for the key pool to refill instead of stopping the worker
    pub pause_on_empty_keypool: bool,

    /// Highest header nonce tried before rolling the extra nonce
    pub max_nonce: u32,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threads: num_cpus::get(),
            hash_batch: 10_000,
            time_update_secs: 5,
            retry_delay_ms: 500,
            pause_on_empty_keypool: true,
            max_nonce: u32::MAX,
        }
    }
}

impl PowConfig {
    /// Timestamp refresh interval
    pub fn time_update_interval(&self) -> Duration {
        Duration::from_secs(self.time_update_secs)
    }

    /// Retry delay when no template can be built
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// PoS configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PosConfig {
    /// Start the minter at launch
    pub enabled: bool,

    /// Milliseconds between kernel searches
    pub poll_interval_ms: u64,

    /// Minimum output age before it may stake (seconds)
    pub min_stake_age: u64,

    /// Age beyond which stake weight stops growing (seconds)
    pub max_stake_age: u64,

    /// Low timestamp bits cleared before kernel hashing (2^k - 1)
    pub timestamp_mask: u64,
}

impl Default for PosConfig {
    fn default() -> Self {
        let kernel = KernelParams::default();
        Self {
            enabled: false,
            poll_interval_ms: 500,
            min_stake_age: kernel.min_stake_age,
            max_stake_age: kernel.max_stake_age,
            timestamp_mask: kernel.timestamp_mask,
        }
    }
}

impl PosConfig {
    /// Kernel parameters pinned by this configuration
    pub fn kernel_params(&self) -> KernelParams {
        KernelParams {
            min_stake_age: self.min_stake_age,
            max_stake_age: self.max_stake_age,
            timestamp_mask: self.timestamp_mask,
        }
    }

    /// Interval between kernel searches
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// PoA configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoaConfig {
    /// Start the minter at launch
    pub enabled: bool,

    /// Period length in seconds
    pub period_secs: u64,

    /// Path of the persisted last-produced period (in memory if unset)
    pub marker_path: Option<PathBuf>,

    /// Hex-encoded 32-byte authority secret key
    pub authority_key: Option<String>,
}

impl Default for PoaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: 30,
            marker_path: None,
            authority_key: None,
        }
    }
}

impl MinerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MiningError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| MiningError::InvalidConfig(e.to_string()))
    }

    /// Apply `FORGE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(threads) = var("FORGE_THREADS").and_then(|v| v.parse().ok()) {
            self.pow.threads = threads;
        }
        if let Some(period) = var("FORGE_POA_PERIOD").and_then(|v| v.parse().ok()) {
            self.poa.period_secs = period;
        }
        if let Some(level) = var("FORGE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(path) = var("FORGE_MARKER_PATH") {
            self.poa.marker_path = Some(PathBuf::from(path));
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.selection.max_block_size == 0 {
            return Err(MiningError::InvalidConfig("max_block_size must be > 0".into()));
        }
        // Every template spends at least its reward transaction's cost
        let reward_cost = [
            ConsensusMode::ProofOfWork,
            ConsensusMode::ProofOfStake,
            ConsensusMode::ProofOfAuthority,
        ]
        .into_iter()
        .map(reward_op_cost)
        .max()
        .unwrap_or_default();
        if self.selection.max_block_op_cost < reward_cost {
            return Err(MiningError::InvalidConfig(format!(
                "max_block_op_cost ({}) is below the reward transaction cost ({})",
                self.selection.max_block_op_cost, reward_cost
            )));
        }
        if self.pow.hash_batch == 0 {
            return Err(MiningError::InvalidConfig("pow.hash_batch must be > 0".into()));
        }
        if self.poa.period_secs == 0 {
            return Err(MiningError::InvalidConfig("poa.period_secs must be > 0".into()));
        }
        if self.pos.poll_interval_ms == 0 {
            return Err(MiningError::InvalidConfig(
                "pos.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.pos.min_stake_age > self.pos.max_stake_age {
            return Err(MiningError::InvalidConfig(format!(
                "pos.min_stake_age ({}) exceeds pos.max_stake_age ({})",
                self.pos.min_stake_age, self.pos.max_stake_age
            )));
        }
        // Mask must clear whole low bits: 0, 1, 3, 7, 15, ...
        if self.pos.timestamp_mask & self.pos.timestamp_mask.wrapping_add(1) != 0 {
            return Err(MiningError::InvalidConfig(format!(
                "pos.timestamp_mask {:#x} is not 2^k - 1",
                self.pos.timestamp_mask
            )));
        }
        for (name, rules) in [
            ("pow_difficulty", &self.pow_difficulty),
            ("pos_difficulty", &self.pos_difficulty),
        ] {
            if rules.hardest_target > rules.easiest_target {
                return Err(MiningError::InvalidConfig(format!(
                    "{}: hardest_target above easiest_target",
                    name
                )));
            }
        }
        if self.hashrate_window_secs == 0 {
            return Err(MiningError::InvalidConfig(
                "hashrate_window_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}
