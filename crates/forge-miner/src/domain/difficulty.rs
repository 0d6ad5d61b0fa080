//! Target retargeting
//!
//! Per-block (Dark Gravity Wave style) and epoch based adjustment. PoW and PoS
//! keep independent histories: each rule only averages ancestors produced
//! under its own consensus mode. PoA blocks carry no work and always use the
//! easiest target.
//!
//! The target is a CEILING on the proof hash:
//! - HIGHER target = EASIER
//! - LOWER target = HARDER

use super::entities::{ChainTip, ConsensusMode};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Retarget configuration for one consensus mode
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetConfig {
    /// Target time between blocks of this mode (seconds)
    pub target_block_time: u64,

    /// Number of blocks per adjustment epoch
    pub adjustment_period: u64,

    /// Use per-block adjustment instead of epoch-based
    pub use_dgw: bool,

    /// Number of same-mode blocks to average for per-block adjustment
    pub dgw_window: usize,

    /// Target used until enough history exists
    pub initial_target: U256,

    /// Hardest allowed target (lowest number)
    pub hardest_target: U256,

    /// Easiest allowed target (highest number)
    pub easiest_target: U256,

    /// Maximum adjustment factor per recalculation
    pub max_adjustment_factor: u64,

    /// Allow the easiest target once this many seconds passed since the tip
    pub min_difficulty_after_secs: Option<u64>,
}

impl Default for RetargetConfig {
    fn default() -> Self {
        Self {
            target_block_time: 60,
            adjustment_period: 100,
            use_dgw: true,
            dgw_window: 24,
            // ~21 leading zero bits: a few seconds for a single CPU
            initial_target: U256::from(2).pow(U256::from(235)),
            hardest_target: U256::from(2).pow(U256::from(200)),
            easiest_target: U256::from(2).pow(U256::from(248)),
            max_adjustment_factor: 4,
            min_difficulty_after_secs: None,
        }
    }
}

/// Block information for retarget calculation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block height
    pub height: u64,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Target the block was produced under
    pub target: U256,
    /// Consensus mode that produced the block
    pub mode: ConsensusMode,
}

/// Retarget calculator for one consensus mode
#[derive(Clone, Debug)]
pub struct TargetAdjuster {
    config: RetargetConfig,
}

impl TargetAdjuster {
    /// Create a new target adjuster
    pub fn new(config: RetargetConfig) -> Self {
        Self { config }
    }

    /// Configuration in use
    pub fn config(&self) -> &RetargetConfig {
        &self.config
    }

    /// Calculate next target from same-mode history (newest first)
    pub fn calculate_next_target(&self, history: &[BlockInfo]) -> U256 {
        if history.len() < 2 {
            return self.config.initial_target;
        }

        if self.config.use_dgw {
            self.calculate_dgw_target(history)
        } else {
            self.calculate_epoch_target(history)
        }
    }

    /// Per-block adjustment over the last `dgw_window` blocks
    fn calculate_dgw_target(&self, history: &[BlockInfo]) -> U256 {
        let window_size = self.config.dgw_window.min(history.len());

        if window_size < 2 {
            return history[0].target;
        }

        let blocks = &history[0..window_size];
        let newest = &blocks[0];
        let oldest = &blocks[window_size - 1];

        let actual_time = newest.timestamp.saturating_sub(oldest.timestamp).max(1);
        let expected_time = (window_size - 1) as u64 * self.config.target_block_time;
        if expected_time == 0 {
            return self.clamp_target(history[0].target);
        }

        let clamped_actual_time = self.clamp_timespan(actual_time, expected_time);

        let sum = blocks
            .iter()
            .fold(U256::zero(), |acc, b| acc.saturating_add(b.target));
        let avg_target = sum / U256::from(window_size);

        // avg * actual / expected without overflowing on large targets
        let expected = U256::from(expected_time);
        let actual = U256::from(clamped_actual_time);
        let quotient = avg_target / expected;
        let remainder = avg_target % expected;
        let new_target = quotient
            .saturating_mul(actual)
            .saturating_add(remainder.saturating_mul(actual) / expected);

        self.clamp_target(new_target)
    }

    /// Epoch adjustment every `adjustment_period` blocks
    fn calculate_epoch_target(&self, history: &[BlockInfo]) -> U256 {
        let current_height = history[0].height;
        let current_target = history[0].target;
        let period = self.config.adjustment_period.max(1);

        if current_height % period != 0 || history.len() < period as usize {
            return current_target;
        }

        let epoch = &history[0..period as usize];
        let newest = &epoch[0];
        let oldest = &epoch[epoch.len() - 1];

        let actual_time = if newest.timestamp > oldest.timestamp {
            newest.timestamp - oldest.timestamp
        } else {
            self.config.target_block_time
        };
        let expected_time = period * self.config.target_block_time;
        if expected_time == 0 {
            return self.clamp_target(current_target);
        }

        let clamped_actual_time = self.clamp_timespan(actual_time, expected_time);
        let new_target = current_target.saturating_mul(U256::from(clamped_actual_time))
            / U256::from(expected_time);

        self.clamp_target(new_target)
    }

    fn clamp_timespan(&self, actual: u64, expected: u64) -> u64 {
        let factor = self.config.max_adjustment_factor.max(1);
        let min_time = (expected / factor).max(1);
        let max_time = expected.saturating_mul(factor).max(min_time);
        actual.clamp(min_time, max_time)
    }

    /// Clamp target to the configured hardest/easiest bounds
    fn clamp_target(&self, target: U256) -> U256 {
        if target < self.config.hardest_target {
            self.config.hardest_target
        } else if target > self.config.easiest_target {
            self.config.easiest_target
        } else {
            target
        }
    }

    /// Human-readable description of a target
    pub fn describe_target(target: U256) -> String {
        format!("~{} leading zero bits", target.leading_zeros())
    }
}

/// Retarget rules for every consensus mode
#[derive(Clone, Debug)]
pub struct RetargetRules {
    pow: TargetAdjuster,
    pos: TargetAdjuster,
}

impl RetargetRules {
    /// Create rules from per-mode configuration
    pub fn new(pow: RetargetConfig, pos: RetargetConfig) -> Self {
        Self {
            pow: TargetAdjuster::new(pow),
            pos: TargetAdjuster::new(pos),
        }
    }

    /// Target for the block following `tip` under `mode`, at `candidate_time`
    ///
    /// The candidate time only matters when a minimum-difficulty gap rule is
    /// configured; it is what makes a timestamp bump change the target.
    pub fn next_target(&self, mode: ConsensusMode, tip: &ChainTip, candidate_time: u64) -> U256 {
        let adjuster = match mode {
            ConsensusMode::ProofOfWork => &self.pow,
            ConsensusMode::ProofOfStake => &self.pos,
            ConsensusMode::ProofOfAuthority => return U256::MAX,
        };

        if let Some(gap) = adjuster.config.min_difficulty_after_secs {
            if candidate_time > tip.timestamp.saturating_add(gap) {
                return adjuster.config.easiest_target;
            }
        }

        let history: Vec<BlockInfo> = tip
            .recent
            .iter()
            .filter(|info| info.mode == mode)
            .cloned()
            .collect();

        adjuster.calculate_next_target(&history)
    }
}

impl Default for RetargetRules {
    fn default() -> Self {
        Self::new(RetargetConfig::default(), RetargetConfig::default())
    }
}
