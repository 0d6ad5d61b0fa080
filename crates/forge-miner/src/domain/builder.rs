//! Block template construction
//!
//! One builder serves all three consensus modes. The mode decides the reward
//! transaction (coinbase, coinstake shell, authority coinbase), the subsidy
//! and the retarget rule; everything else is shared.

use super::difficulty::RetargetRules;
use super::entities::{
    Amount, Block, BlockHeader, BlockTemplate, ChainTip, ConsensusMode, Destination, OutPoint,
    StakeableOutput, Transaction, TxIn, TxOut,
};
use super::invariants;
use super::kernel::StakeKernelCandidate;
use super::selector::{Selection, SelectionConfig, TransactionSelector};
use super::subsidy::SubsidySchedule;
use crate::error::{MiningError, Result};
use crate::ports::outbound::{ChainStateReader, MempoolReader, TransactionValidator};
use crate::utils::time::unix_now;
use primitive_types::H256;
use std::sync::Arc;
use tracing::{debug, error};

/// Tag appended to every coinbase input script
pub const COINBASE_TAG: &[u8] = b"/forge/";

/// Reward transaction version
const REWARD_TX_VERSION: u32 = 1;

/// Operation cost charged for the reward transaction
pub fn reward_op_cost(mode: ConsensusMode) -> u64 {
    match mode {
        // Spends a real output: one signature check plus its outputs
        ConsensusMode::ProofOfStake => 2,
        ConsensusMode::ProofOfWork | ConsensusMode::ProofOfAuthority => 1,
    }
}

/// Coinbase input script: `height (LE u64) || extra_nonce (LE u64) || tag`
pub fn coinbase_script(height: u64, extra_nonce: u64) -> Vec<u8> {
    let mut script = Vec::with_capacity(16 + COINBASE_TAG.len());
    script.extend_from_slice(&height.to_le_bytes());
    script.extend_from_slice(&extra_nonce.to_le_bytes());
    script.extend_from_slice(COINBASE_TAG);
    script
}

/// Read the extra nonce back out of a coinbase input script
pub fn extra_nonce_of(tx: &Transaction) -> Option<u64> {
    let script = &tx.inputs.first()?.script_sig;
    let bytes: [u8; 8] = script.get(8..16)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Coinbase paying `value` to `destination`
pub fn coinbase_transaction(
    height: u64,
    extra_nonce: u64,
    value: Amount,
    destination: &Destination,
) -> Transaction {
    Transaction {
        version: REWARD_TX_VERSION,
        inputs: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: coinbase_script(height, extra_nonce),
        }],
        outputs: vec![TxOut {
            value,
            script_pubkey: destination.as_bytes().to_vec(),
        }],
        lock_time: 0,
    }
}

/// Coinstake before a kernel is found: marker output plus the reward output
fn coinstake_shell(value: Amount, destination: &Destination) -> Transaction {
    Transaction {
        version: REWARD_TX_VERSION,
        inputs: Vec::new(),
        outputs: vec![
            TxOut::empty(),
            TxOut {
                value,
                script_pubkey: destination.as_bytes().to_vec(),
            },
        ],
        lock_time: 0,
    }
}

/// Turn a PoS template's coinstake shell into the real coinstake
///
/// Spends the kernel output back to its own script, pays the reward to the
/// shell's destination and moves the header to the kernel timestamp.
pub fn finalize_coinstake(
    template: &mut BlockTemplate,
    candidate: &StakeKernelCandidate,
    output: &StakeableOutput,
) -> Result<()> {
    if template.mode() != ConsensusMode::ProofOfStake {
        return Err(MiningError::InvalidSelection(format!(
            "cannot finalize a coinstake on a {} template",
            template.mode()
        )));
    }
    if candidate.outpoint != output.outpoint {
        return Err(MiningError::InvalidSelection(
            "kernel candidate does not match staked output".into(),
        ));
    }

    let reward = template
        .block()
        .reward_transaction()
        .and_then(|tx| tx.outputs.last())
        .cloned()
        .ok_or_else(|| MiningError::InvalidSelection("coinstake shell has no reward output".into()))?;

    let coinstake = Transaction {
        version: REWARD_TX_VERSION,
        inputs: vec![TxIn {
            prevout: output.outpoint,
            script_sig: Vec::new(),
        }],
        outputs: vec![
            TxOut::empty(),
            TxOut {
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
            },
            reward,
        ],
        lock_time: 0,
    };

    template.replace_reward(coinstake, reward_op_cost(ConsensusMode::ProofOfStake));
    template.set_timestamp(candidate.timestamp);
    Ok(())
}

/// Block template builder
pub struct TemplateBuilder {
    chain: Arc<dyn ChainStateReader>,
    mempool: Arc<dyn MempoolReader>,
    validator: Arc<dyn TransactionValidator>,
    selector: TransactionSelector,
    rules: RetargetRules,
    subsidy: SubsidySchedule,
    block_version: u32,
}

impl TemplateBuilder {
    /// Create new template builder
    pub fn new(
        chain: Arc<dyn ChainStateReader>,
        mempool: Arc<dyn MempoolReader>,
        validator: Arc<dyn TransactionValidator>,
        selection: SelectionConfig,
        rules: RetargetRules,
        subsidy: SubsidySchedule,
        block_version: u32,
    ) -> Self {
        Self {
            chain,
            mempool,
            validator,
            selector: TransactionSelector::new(selection),
            rules,
            subsidy,
            block_version,
        }
    }

    /// Chain state the builder reads tips from
    pub fn chain(&self) -> &Arc<dyn ChainStateReader> {
        &self.chain
    }

    /// Retarget rules in use
    pub fn rules(&self) -> &RetargetRules {
        &self.rules
    }

    /// Current tip snapshot
    pub fn tip(&self) -> Option<Arc<ChainTip>> {
        self.chain.tip()
    }

    /// Build on the current tip at the current time
    pub fn build(&self, mode: ConsensusMode, destination: &Destination) -> Result<BlockTemplate> {
        let tip = self.chain.tip();
        self.build_at(mode, tip.as_deref(), destination, unix_now())
    }

    /// Build on `tip` as of `now`
    ///
    /// The header timestamp is `max(now, tip.timestamp + 1, median_time_past + 1)`.
    #[tracing::instrument(skip(self, tip, destination), fields(height = tip.map(|t| t.height + 1)))]
    pub fn build_at(
        &self,
        mode: ConsensusMode,
        tip: Option<&ChainTip>,
        destination: &Destination,
        now: u64,
    ) -> Result<BlockTemplate> {
        let tip = tip.ok_or(MiningError::NoValidTip)?;
        let height = tip.height + 1;
        let timestamp = now.max(tip.min_child_timestamp());
        let target = self.rules.next_target(mode, tip, timestamp);
        let reward_cost = reward_op_cost(mode);

        let selection = match mode {
            ConsensusMode::ProofOfAuthority => Selection {
                total_op_cost: reward_cost,
                ..Default::default()
            },
            ConsensusMode::ProofOfWork | ConsensusMode::ProofOfStake => {
                self.selector
                    .select(self.mempool.snapshot(), tip, reward_cost, |tx| {
                        self.validator.is_valid(tx, tip)
                    })
            }
        };

        let reward_value = self
            .subsidy
            .subsidy(mode, height)
            .saturating_add(selection.total_fees);
        let reward = match mode {
            ConsensusMode::ProofOfStake => coinstake_shell(reward_value, destination),
            ConsensusMode::ProofOfWork | ConsensusMode::ProofOfAuthority => {
                coinbase_transaction(height, 0, reward_value, destination)
            }
        };

        let count = selection.entries.len() + 1;
        let mut transactions = Vec::with_capacity(count);
        let mut fees = Vec::with_capacity(count);
        let mut op_costs = Vec::with_capacity(count);

        transactions.push(reward);
        fees.push(0);
        op_costs.push(reward_cost);
        for entry in selection.entries {
            fees.push(entry.fee);
            op_costs.push(entry.op_cost);
            transactions.push(entry.tx);
        }

        let mut block = Block {
            header: BlockHeader {
                version: self.block_version,
                height,
                parent_hash: tip.hash,
                merkle_root: H256::zero(),
                timestamp,
                target,
                nonce: 0,
            },
            transactions,
            signature: Vec::new(),
        };
        block.header.merkle_root = block.compute_merkle_root();

        let template = BlockTemplate::new(block, fees, op_costs, mode, now);
        if let Err(e) = invariants::check_all(&template, tip, self.selector.config()) {
            error!("[forge] template for height {} failed consistency checks: {}", height, e);
            return Err(e);
        }

        debug!(
            height,
            txs = template.tx_count(),
            fees = template.total_fees(),
            op_cost = template.total_op_cost(),
            timestamp,
            "built {} template",
            mode
        );
        Ok(template)
    }
}
