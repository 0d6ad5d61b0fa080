//! Block subsidy schedule

use super::entities::{Amount, ConsensusMode};
use serde::{Deserialize, Serialize};

/// Base units per coin
pub const COIN: Amount = 100_000_000;

/// Subsidy parameters per consensus mode
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsidySchedule {
    /// PoW reward at height 0
    pub initial_reward: Amount,

    /// Blocks between PoW halvings
    pub halving_interval: u64,

    /// Fixed PoS reward
    pub stake_subsidy: Amount,

    /// Fixed PoA reward
    pub authority_subsidy: Amount,
}

impl Default for SubsidySchedule {
    fn default() -> Self {
        Self {
            initial_reward: 50 * COIN,
            halving_interval: 210_000,
            stake_subsidy: 2 * COIN,
            authority_subsidy: COIN,
        }
    }
}

impl SubsidySchedule {
    /// Newly minted amount for a block at `height` under `mode`
    pub fn subsidy(&self, mode: ConsensusMode, height: u64) -> Amount {
        match mode {
            ConsensusMode::ProofOfWork => {
                let halvings = height / self.halving_interval.max(1);
                if halvings >= 64 {
                    return 0;
                }
                self.initial_reward >> halvings
            }
            ConsensusMode::ProofOfStake => self.stake_subsidy,
            ConsensusMode::ProofOfAuthority => self.authority_subsidy,
        }
    }
}
