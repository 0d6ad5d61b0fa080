//! Stake kernel evaluation
//!
//! `kernel = sha256d(stake_modifier || txid || vout || confirmed_at || timestamp)`
//! passes when `kernel <= target * weight`, where weight grows with value and
//! age (capped at the maximum stake age). Timestamps are masked so each output
//! gets at most one try per masked interval.

use super::entities::{Amount, OutPoint, StakeableOutput};
use super::subsidy::COIN;
use crate::utils::hashing::{hash256, hash_to_u256};
use primitive_types::{H256, U256};

/// Seconds in a day
pub const DAY_SECS: u64 = 86_400;

/// Consensus parameters of the stake kernel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelParams {
    /// Minimum output age before it may stake (seconds)
    pub min_stake_age: u64,
    /// Age beyond which weight stops growing (seconds)
    pub max_stake_age: u64,
    /// Low timestamp bits cleared before hashing (2^k - 1)
    pub timestamp_mask: u64,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            min_stake_age: 60 * 60,
            max_stake_age: 30 * DAY_SECS,
            timestamp_mask: 0xF,
        }
    }
}

impl KernelParams {
    /// Clear the masked low bits of a timestamp
    pub fn mask_timestamp(&self, timestamp: u64) -> u64 {
        timestamp & !self.timestamp_mask
    }
}

/// One unspent output evaluated against the stake target at one timestamp
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeKernelCandidate {
    /// Output being staked
    pub outpoint: OutPoint,
    /// Output value
    pub value: Amount,
    /// Output age at `timestamp`
    pub age: u64,
    /// Timestamp of the confirming block
    pub confirmed_at: u64,
    /// Masked candidate timestamp
    pub timestamp: u64,
}

impl StakeKernelCandidate {
    /// Build a candidate, or `None` if the output is too young at `now`
    pub fn new(output: &StakeableOutput, now: u64, params: &KernelParams) -> Option<Self> {
        let timestamp = params.mask_timestamp(now);
        let age = timestamp.checked_sub(output.confirmed_at)?;
        if age < params.min_stake_age || output.value == 0 {
            return None;
        }

        Some(Self {
            outpoint: output.outpoint,
            value: output.value,
            age,
            confirmed_at: output.confirmed_at,
            timestamp,
        })
    }

    /// Coin-day weight, at least 1 for an eligible output
    pub fn weight(&self, params: &KernelParams) -> U256 {
        let age = U256::from(self.age.min(params.max_stake_age));
        let coin_day = U256::from(COIN) * U256::from(DAY_SECS);
        let weight = U256::from(self.value).saturating_mul(age) / coin_day;
        weight.max(U256::one())
    }

    /// Kernel hash under `stake_modifier`
    pub fn kernel_hash(&self, stake_modifier: &H256) -> H256 {
        let mut data = Vec::with_capacity(32 + 32 + 4 + 8 + 8);
        data.extend_from_slice(stake_modifier.as_bytes());
        data.extend_from_slice(self.outpoint.txid.as_bytes());
        data.extend_from_slice(&self.outpoint.vout.to_le_bytes());
        data.extend_from_slice(&self.confirmed_at.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        hash256(&data)
    }

    /// Check the kernel against the weighted target
    pub fn meets_target(&self, stake_modifier: &H256, target: U256, params: &KernelParams) -> bool {
        let weighted = target.saturating_mul(self.weight(params));
        hash_to_u256(&self.kernel_hash(stake_modifier)) <= weighted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(value: Amount, confirmed_at: u64) -> StakeableOutput {
        StakeableOutput {
            outpoint: OutPoint::new(H256::repeat_byte(9), 1),
            value,
            script_pubkey: vec![0x51],
            confirmed_at,
        }
    }

    #[test]
    fn test_young_output_not_eligible() {
        let params = KernelParams::default();
        let out = output(100 * COIN, 10_000);
        assert!(StakeKernelCandidate::new(&out, 10_000 + 60, &params).is_none());
        assert!(StakeKernelCandidate::new(&out, 5_000, &params).is_none());
    }

    #[test]
    fn test_timestamp_is_masked() {
        let params = KernelParams::default();
        let out = output(100 * COIN, 0);
        let candidate = StakeKernelCandidate::new(&out, 100_007, &params).unwrap();
        assert_eq!(candidate.timestamp, 100_000);

        let same_slot = StakeKernelCandidate::new(&out, 100_015, &params).unwrap();
        assert_eq!(
            candidate.kernel_hash(&H256::zero()),
            same_slot.kernel_hash(&H256::zero())
        );
    }

    #[test]
    fn test_weight_grows_with_value_and_caps_age() {
        let params = KernelParams::default();
        let small = StakeKernelCandidate::new(&output(10 * COIN, 0), 2 * DAY_SECS, &params).unwrap();
        let large = StakeKernelCandidate::new(&output(100 * COIN, 0), 2 * DAY_SECS, &params).unwrap();
        assert!(large.weight(&params) > small.weight(&params));

        let capped = StakeKernelCandidate::new(&output(10 * COIN, 0), 60 * DAY_SECS, &params).unwrap();
        let older = StakeKernelCandidate::new(&output(10 * COIN, 0), 90 * DAY_SECS, &params).unwrap();
        assert_eq!(capped.weight(&params), older.weight(&params));
    }

    #[test]
    fn test_weight_floor_is_one() {
        let params = KernelParams::default();
        let dust = StakeKernelCandidate::new(&output(1, 0), 2 * DAY_SECS, &params).unwrap();
        assert_eq!(dust.weight(&params), U256::one());
    }

    #[test]
    fn test_meets_target_extremes() {
        let params = KernelParams::default();
        let candidate = StakeKernelCandidate::new(&output(COIN, 0), DAY_SECS, &params).unwrap();
        assert!(candidate.meets_target(&H256::zero(), U256::MAX, &params));
        assert!(!candidate.meets_target(&H256::zero(), U256::zero(), &params));
    }
}
