//! Template consistency checks
//!
//! A template that fails any of these is never handed to a miner. Failures
//! surface as `InvalidSelection` and abort only the current attempt.

use super::entities::{BlockTemplate, ChainTip, ConsensusMode};
use super::selector::SelectionConfig;
use crate::error::{MiningError, Result};
use std::collections::HashSet;

/// Fee and cost sequences run parallel to the transaction list
pub fn check_parallel_sequences(template: &BlockTemplate) -> Result<()> {
    let txs = template.tx_count();
    if template.fees().len() != txs || template.op_costs().len() != txs {
        return Err(MiningError::InvalidSelection(format!(
            "sequence lengths differ: txs={} fees={} costs={}",
            txs,
            template.fees().len(),
            template.op_costs().len()
        )));
    }
    Ok(())
}

/// The first transaction is the reward transaction and carries fee 0
pub fn check_reward_first(template: &BlockTemplate) -> Result<()> {
    let reward = template
        .block()
        .reward_transaction()
        .ok_or_else(|| MiningError::InvalidSelection("template has no reward transaction".into()))?;

    let shaped = match template.mode() {
        ConsensusMode::ProofOfStake => reward.is_coinstake(),
        ConsensusMode::ProofOfWork | ConsensusMode::ProofOfAuthority => reward.is_coinbase(),
    };
    if !shaped {
        return Err(MiningError::InvalidSelection(format!(
            "first transaction is not a {} reward",
            template.mode()
        )));
    }

    if template.fees().first().copied() != Some(0) {
        return Err(MiningError::InvalidSelection(
            "reward transaction must carry fee 0".into(),
        ));
    }

    let extra_rewards = template.block().transactions[1..]
        .iter()
        .filter(|tx| tx.is_coinbase())
        .count();
    if extra_rewards > 0 {
        return Err(MiningError::InvalidSelection(format!(
            "{} coinbase transactions past index 0",
            extra_rewards
        )));
    }

    Ok(())
}

/// Header merkle root matches the transaction list
pub fn check_merkle_root(template: &BlockTemplate) -> Result<()> {
    let computed = template.block().compute_merkle_root();
    if computed != template.header().merkle_root {
        return Err(MiningError::InvalidSelection(
            "merkle root does not match transactions".into(),
        ));
    }
    Ok(())
}

/// No transaction appears twice
pub fn check_no_duplicates(template: &BlockTemplate) -> Result<()> {
    let mut seen = HashSet::with_capacity(template.tx_count());
    for tx in &template.block().transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(MiningError::InvalidSelection(format!(
                "duplicate transaction {:?}",
                txid
            )));
        }
    }
    Ok(())
}

/// Size (reward excluded) and operation-cost (reward included) budgets hold
pub fn check_budgets(template: &BlockTemplate, config: &SelectionConfig) -> Result<()> {
    let size: usize = template
        .block()
        .transactions
        .iter()
        .skip(1)
        .map(|tx| tx.serialized_size())
        .sum();
    if size > config.max_block_size {
        return Err(MiningError::InvalidSelection(format!(
            "size {} exceeds budget {}",
            size, config.max_block_size
        )));
    }

    let cost = template.total_op_cost();
    if cost > config.max_block_op_cost {
        return Err(MiningError::InvalidSelection(format!(
            "operation cost {} exceeds ceiling {}",
            cost, config.max_block_op_cost
        )));
    }
    Ok(())
}

/// Template extends `tip` and is strictly newer than it
pub fn check_extends_tip(template: &BlockTemplate, tip: &ChainTip) -> Result<()> {
    let header = template.header();
    if header.parent_hash != tip.hash || header.height != tip.height + 1 {
        return Err(MiningError::InvalidSelection(format!(
            "template at height {} does not extend tip {}",
            header.height, tip.height
        )));
    }
    if header.timestamp <= tip.timestamp {
        return Err(MiningError::InvalidSelection(format!(
            "timestamp {} not after tip timestamp {}",
            header.timestamp, tip.timestamp
        )));
    }
    Ok(())
}

/// Run every check
pub fn check_all(template: &BlockTemplate, tip: &ChainTip, config: &SelectionConfig) -> Result<()> {
    check_parallel_sequences(template)?;
    check_reward_first(template)?;
    check_merkle_root(template)?;
    check_no_duplicates(template)?;
    check_budgets(template, config)?;
    check_extends_tip(template, tip)?;
    Ok(())
}
