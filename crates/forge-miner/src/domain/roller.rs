//! Nonce and timestamp rolling for PoW templates
//!
//! The header nonce walks `[0, max_nonce]` once per extra-nonce value. When the
//! range is exhausted the extra nonce in the coinbase script moves to the next
//! value of this worker's partition and the merkle root is recomputed. Worker
//! `i` of `n` uses extra nonces `i + 1, i + 1 + n, i + 1 + 2n, ...`.

use super::builder::coinbase_script;
use super::difficulty::RetargetRules;
use super::entities::{BlockTemplate, ChainTip};
use crate::error::{MiningError, Result};

/// Outcome of a timestamp refresh
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeUpdate {
    /// Timestamp kept
    Unchanged,
    /// Timestamp moved forward, template still valid
    Advanced,
    /// New timestamp changes the target; build a fresh template
    NeedsRebuild,
}

/// Per-worker nonce state over one template
#[derive(Clone, Debug)]
pub struct NonceRoller {
    partition: u64,
    partitions: u64,
    max_nonce: u32,
    next: u64,
    extra_nonce: u64,
    rollovers: u64,
}

impl NonceRoller {
    /// Create a roller for worker `partition` of `partitions`
    pub fn new(partition: usize, partitions: usize, max_nonce: u32) -> Self {
        Self {
            partition: partition as u64,
            partitions: partitions.max(1) as u64,
            max_nonce,
            next: 0,
            extra_nonce: 0,
            rollovers: 0,
        }
    }

    /// Current extra nonce
    pub fn extra_nonce(&self) -> u64 {
        self.extra_nonce
    }

    /// Number of extra-nonce rollovers since `prepare`
    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }

    /// Move a fresh template onto this worker's first extra nonce
    pub fn prepare(&mut self, template: &mut BlockTemplate) -> Result<()> {
        self.extra_nonce = self.partition + 1;
        self.rollovers = 0;
        self.next = 0;
        set_extra_nonce(template, self.extra_nonce)
    }

    /// Write the next nonce into the header, `None` once the range is spent
    #[inline]
    pub fn next_nonce(&mut self, template: &mut BlockTemplate) -> Option<u32> {
        if self.next > self.max_nonce as u64 {
            return None;
        }
        let nonce = self.next as u32;
        self.next += 1;
        template.set_nonce(nonce);
        Some(nonce)
    }

    /// Advance to the next extra nonce of this partition and reset the range
    pub fn roll_extra_nonce(&mut self, template: &mut BlockTemplate) -> Result<u64> {
        self.extra_nonce = self
            .extra_nonce
            .checked_add(self.partitions)
            .ok_or_else(|| MiningError::Internal("extra nonce space exhausted".into()))?;
        self.rollovers += 1;
        self.next = 0;
        set_extra_nonce(template, self.extra_nonce)?;
        Ok(self.extra_nonce)
    }
}

/// Rewrite the coinbase script with `extra_nonce` and refresh the merkle root
pub fn set_extra_nonce(template: &mut BlockTemplate, extra_nonce: u64) -> Result<()> {
    let height = template.header().height;
    let op_cost = template.op_costs().first().copied().unwrap_or_default();
    let mut coinbase = match template.block().reward_transaction() {
        Some(tx) if tx.is_coinbase() => tx.clone(),
        _ => {
            return Err(MiningError::InvalidSelection(
                "extra nonce requires a coinbase reward".into(),
            ))
        }
    };

    coinbase.inputs[0].script_sig = coinbase_script(height, extra_nonce);
    template.replace_reward(coinbase, op_cost);
    Ok(())
}

/// Move the header timestamp towards `now`
///
/// Never below the tip's successor minimum, never past `now + max_drift_secs`,
/// never backwards. If the later timestamp changes the target, the template
/// is left alone and the caller must rebuild.
pub fn update_time(
    template: &mut BlockTemplate,
    tip: &ChainTip,
    now: u64,
    max_drift_secs: u64,
    rules: &RetargetRules,
) -> TimeUpdate {
    let candidate = now.max(tip.min_child_timestamp());
    if candidate > now.saturating_add(max_drift_secs) || candidate <= template.header().timestamp {
        return TimeUpdate::Unchanged;
    }

    let target = rules.next_target(template.mode(), tip, candidate);
    if target != template.header().target {
        return TimeUpdate::NeedsRebuild;
    }

    template.set_timestamp(candidate);
    TimeUpdate::Advanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::builder::{coinbase_transaction, extra_nonce_of};
    use crate::domain::difficulty::RetargetConfig;
    use crate::domain::entities::{Block, BlockHeader, ConsensusMode, Destination, TxOut};
    use primitive_types::H256;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn tip() -> ChainTip {
        ChainTip::genesis(H256::repeat_byte(5), 10_000, RetargetConfig::default().initial_target)
    }

    fn pow_template(tip: &ChainTip, timestamp: u64) -> BlockTemplate {
        let coinbase = coinbase_transaction(tip.height + 1, 0, 50, &Destination(vec![1, 2, 3]));
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                height: tip.height + 1,
                parent_hash: tip.hash,
                merkle_root: H256::zero(),
                timestamp,
                target: RetargetConfig::default().initial_target,
                nonce: 0,
            },
            transactions: vec![coinbase],
            signature: vec![],
        };
        block.header.merkle_root = block.compute_merkle_root();
        BlockTemplate::new(block, vec![0], vec![1], ConsensusMode::ProofOfWork, timestamp)
    }

    #[test]
    fn test_prepare_uses_partition_offset() {
        let tip = tip();
        let mut t = pow_template(&tip, 10_001);
        let root = t.header().merkle_root;

        let mut roller = NonceRoller::new(2, 4, 10);
        roller.prepare(&mut t).unwrap();

        assert_eq!(roller.extra_nonce(), 3);
        assert_eq!(extra_nonce_of(&t.block().transactions[0]), Some(3));
        assert_ne!(t.header().merkle_root, root);
        assert_eq!(t.header().merkle_root, t.block().compute_merkle_root());
    }

    #[test]
    fn test_rollover_steps_by_partition_count() {
        let tip = tip();
        let mut t = pow_template(&tip, 10_001);
        let mut roller = NonceRoller::new(1, 3, 3);
        roller.prepare(&mut t).unwrap();

        let mut seen = Vec::new();
        while let Some(n) = roller.next_nonce(&mut t) {
            seen.push(n);
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);

        assert_eq!(roller.roll_extra_nonce(&mut t).unwrap(), 5);
        assert_eq!(roller.roll_extra_nonce(&mut t).unwrap(), 8);
        assert_eq!(roller.rollovers(), 2);
        assert_eq!(roller.next_nonce(&mut t), Some(0));
        assert_eq!(t.header().nonce, 0);
    }

    #[test]
    fn test_partitions_never_share_extra_nonces() {
        let tip = tip();
        let mut used = HashSet::new();
        for partition in 0..4 {
            let mut t = pow_template(&tip, 10_001);
            let mut roller = NonceRoller::new(partition, 4, 0);
            roller.prepare(&mut t).unwrap();
            assert!(used.insert(roller.extra_nonce()));
            for _ in 0..10 {
                assert!(used.insert(roller.roll_extra_nonce(&mut t).unwrap()));
            }
        }
    }

    #[test]
    fn test_extra_nonce_rejects_coinstake() {
        let tip = tip();
        let t = pow_template(&tip, 10_001);
        let mut block = t.into_block();
        block.transactions[0].inputs.clear();
        block.transactions[0].outputs.insert(0, TxOut::empty());
        let mut stake =
            BlockTemplate::new(block, vec![0], vec![2], ConsensusMode::ProofOfStake, 10_001);
        assert!(set_extra_nonce(&mut stake, 1).is_err());
    }

    #[test]
    fn test_update_time_advances() {
        let tip = tip();
        let mut t = pow_template(&tip, 10_001);
        let rules = RetargetRules::default();

        assert_eq!(update_time(&mut t, &tip, 10_050, 7_200, &rules), TimeUpdate::Advanced);
        assert_eq!(t.header().timestamp, 10_050);

        // Never backwards
        assert_eq!(update_time(&mut t, &tip, 10_020, 7_200, &rules), TimeUpdate::Unchanged);
        assert_eq!(t.header().timestamp, 10_050);
    }

    #[test]
    fn test_update_time_floor_is_tip_successor() {
        let tip = tip();
        let mut t = pow_template(&tip, 10_001);
        let rules = RetargetRules::default();
        // Clock behind the tip: floor is tip + 1, which the header already has
        assert_eq!(update_time(&mut t, &tip, 9_000, 7_200, &rules), TimeUpdate::Unchanged);
        assert_eq!(t.header().timestamp, 10_001);
    }

    #[test]
    fn test_update_time_respects_drift() {
        let mut tip = tip();
        tip.timestamp = 20_000;
        tip.median_time_past = 20_000;
        let mut t = pow_template(&tip, 20_001);
        let rules = RetargetRules::default();
        // Tip is far ahead of the local clock
        assert_eq!(update_time(&mut t, &tip, 10_000, 60, &rules), TimeUpdate::Unchanged);
    }

    #[test]
    fn test_update_time_target_change_needs_rebuild() {
        let config = RetargetConfig {
            min_difficulty_after_secs: Some(100),
            ..Default::default()
        };
        let rules = RetargetRules::new(config, RetargetConfig::default());
        let tip = tip();
        let mut t = pow_template(&tip, 10_001);

        assert_eq!(update_time(&mut t, &tip, 10_050, 7_200, &rules), TimeUpdate::Advanced);
        assert_eq!(update_time(&mut t, &tip, 10_200, 7_200, &rules), TimeUpdate::NeedsRebuild);
        assert_eq!(t.header().timestamp, 10_050);
    }

    proptest! {
        #[test]
        fn prop_each_nonce_once_per_pass(max_nonce in 0u32..200, partition in 0usize..4, passes in 1usize..4) {
            let tip = tip();
            let mut t = pow_template(&tip, 10_001);
            let mut roller = NonceRoller::new(partition, 4, max_nonce);
            roller.prepare(&mut t).unwrap();

            let mut roots = HashSet::new();
            for pass in 0..passes {
                prop_assert!(roots.insert(t.header().merkle_root));
                let mut seen = HashSet::new();
                while let Some(n) = roller.next_nonce(&mut t) {
                    prop_assert!(seen.insert(n));
                }
                prop_assert_eq!(seen.len() as u64, max_nonce as u64 + 1);
                prop_assert_eq!(roller.extra_nonce(), (partition + 1 + pass * 4) as u64);
                roller.roll_extra_nonce(&mut t).unwrap();
            }
        }
    }
}
