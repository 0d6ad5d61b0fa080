//! Domain entities for block template construction

use super::difficulty::BlockInfo;
use crate::utils::hashing::{hash256, merkle_root};
use primitive_types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coin amount in base units
pub type Amount = u64;

/// Number of recent ancestors carried in a tip snapshot
pub const RECENT_BLOCKS_KEPT: usize = 64;

/// Consensus mechanism a template is built for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsensusMode {
    /// Proof of Work - nonce search against a target
    #[serde(rename = "pow")]
    ProofOfWork,

    /// Proof of Stake - stake kernel search over wallet outputs
    #[serde(rename = "pos")]
    ProofOfStake,

    /// Proof of Authority - one signed block per period
    #[serde(rename = "poa")]
    ProofOfAuthority,
}

impl fmt::Display for ConsensusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::ProofOfWork => "PoW",
            Self::ProofOfStake => "PoS",
            Self::ProofOfAuthority => "PoA",
        };
        f.write_str(tag)
    }
}

/// Output script the block reward is paid to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(pub Vec<u8>);

impl Destination {
    /// Raw script bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Reference to a transaction output
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction id
    pub txid: H256,
    /// Output index
    pub vout: u32,
}

impl OutPoint {
    /// Create a new outpoint
    pub fn new(txid: H256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint spent by reward transactions
    pub fn null() -> Self {
        Self {
            txid: H256::zero(),
            vout: u32::MAX,
        }
    }

    /// Check if this is the null outpoint
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

/// Transaction input
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Output being spent
    pub prevout: OutPoint,
    /// Unlocking script (carries height and extra nonce for coinbases)
    pub script_sig: Vec<u8>,
}

/// Transaction output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Value in base units
    pub value: Amount,
    /// Locking script
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    /// Zero-value output with an empty script (coinstake marker)
    pub fn empty() -> Self {
        Self {
            value: 0,
            script_pubkey: Vec::new(),
        }
    }

    /// Check if this is the coinstake marker output
    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_pubkey.is_empty()
    }
}

/// A transaction as far as template construction needs to see it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Format version
    pub version: u32,
    /// Inputs
    pub inputs: Vec<TxIn>,
    /// Outputs
    pub outputs: Vec<TxOut>,
    /// Lock time
    pub lock_time: u32,
}

impl Transaction {
    /// Canonical serialization used for ids and size accounting
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.inputs.len() * 48 + self.outputs.len() * 40);
        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            bytes.extend_from_slice(input.prevout.txid.as_bytes());
            bytes.extend_from_slice(&input.prevout.vout.to_le_bytes());
            bytes.extend_from_slice(&(input.script_sig.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&input.script_sig);
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.value.to_le_bytes());
            bytes.extend_from_slice(&(output.script_pubkey.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&output.script_pubkey);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());
        bytes
    }

    /// Transaction id
    pub fn txid(&self) -> H256 {
        hash256(&self.serialize())
    }

    /// Serialized size in bytes
    pub fn serialized_size(&self) -> usize {
        self.serialize().len()
    }

    /// Check if this transaction mints new coins from the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Check if this transaction is a coinstake (first output is the empty marker)
    ///
    /// The unfinalized coinstake shell has no inputs yet and still counts.
    pub fn is_coinstake(&self) -> bool {
        self.outputs.len() >= 2
            && self.outputs[0].is_empty()
            && self.inputs.iter().all(|input| !input.prevout.is_null())
    }

    /// Sum of output values
    pub fn total_output_value(&self) -> Amount {
        self.outputs
            .iter()
            .fold(0u64, |acc, out| acc.saturating_add(out.value))
    }
}

/// Block header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Block height
    pub height: u64,
    /// Parent block hash
    pub parent_hash: H256,
    /// Merkle root over the transaction list
    pub merkle_root: H256,
    /// Unix timestamp
    pub timestamp: u64,
    /// Target threshold (higher = easier)
    pub target: U256,
    /// PoW nonce (zero for PoS/PoA)
    pub nonce: u32,
}

impl BlockHeader {
    /// Serialized header bytes (hashed for PoW and signed for PoS/PoA)
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(self.parent_hash.as_bytes());
        bytes.extend_from_slice(self.merkle_root.as_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        let mut target = [0u8; 32];
        self.target.to_big_endian(&mut target);
        bytes.extend_from_slice(&target);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    /// Header hash
    pub fn hash(&self) -> H256 {
        hash256(&self.serialize())
    }
}

/// A complete block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Transactions, reward transaction first
    pub transactions: Vec<Transaction>,
    /// Block signature (stake key for PoS, authority key for PoA, empty for PoW)
    pub signature: Vec<u8>,
}

impl Block {
    /// Block hash (header hash)
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Merkle root computed from the current transaction list
    pub fn compute_merkle_root(&self) -> H256 {
        let ids: Vec<H256> = self.transactions.iter().map(Transaction::txid).collect();
        merkle_root(&ids)
    }

    /// The reward transaction (coinbase or coinstake)
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// Immutable view of the chain tip (the BlockIndex the core reads)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainTip {
    /// Tip block hash
    pub hash: H256,
    /// Tip height
    pub height: u64,
    /// Tip timestamp
    pub timestamp: u64,
    /// Median time of the last blocks
    pub median_time_past: u64,
    /// Cumulative work/stake weight
    pub chain_work: U256,
    /// Target the tip was produced under
    pub target: U256,
    /// Stake modifier used in kernel hashes of the next block
    pub stake_modifier: H256,
    /// Recent ancestors, newest first, tip included
    pub recent: Vec<BlockInfo>,
}

impl ChainTip {
    /// Genesis tip
    pub fn genesis(hash: H256, timestamp: u64, target: U256) -> Self {
        Self {
            hash,
            height: 0,
            timestamp,
            median_time_past: timestamp,
            chain_work: U256::zero(),
            target,
            stake_modifier: H256::zero(),
            recent: vec![BlockInfo {
                height: 0,
                timestamp,
                target,
                mode: ConsensusMode::ProofOfWork,
            }],
        }
    }

    /// Earliest timestamp a child block may carry
    pub fn min_child_timestamp(&self) -> u64 {
        self.timestamp.max(self.median_time_past) + 1
    }

    /// Tip snapshot that results from appending `block`
    pub fn extend(&self, block: &Block, mode: ConsensusMode) -> Self {
        let header = &block.header;
        let hash = block.hash();

        let mut recent = Vec::with_capacity(RECENT_BLOCKS_KEPT);
        recent.push(BlockInfo {
            height: header.height,
            timestamp: header.timestamp,
            target: header.target,
            mode,
        });
        recent.extend(self.recent.iter().take(RECENT_BLOCKS_KEPT - 1).cloned());

        let mut times: Vec<u64> = recent
            .iter()
            .take(crate::MEDIAN_TIME_SPAN)
            .map(|b| b.timestamp)
            .collect();
        times.sort_unstable();
        let median_time_past = times[times.len() / 2];

        let mut modifier_input = Vec::with_capacity(64);
        modifier_input.extend_from_slice(self.stake_modifier.as_bytes());
        modifier_input.extend_from_slice(hash.as_bytes());

        Self {
            hash,
            height: header.height,
            timestamp: header.timestamp,
            median_time_past,
            chain_work: self.chain_work.saturating_add(block_work(header.target)),
            target: header.target,
            stake_modifier: hash256(&modifier_input),
            recent,
        }
    }
}

/// Expected work represented by a block with `target`
pub fn block_work(target: U256) -> U256 {
    if target == U256::MAX {
        return U256::one();
    }
    U256::MAX / (target + U256::one())
}

/// Pending pool entry with the bookkeeping the selector ranks on
#[derive(Clone, Debug)]
pub struct PoolEntry {
    /// The transaction
    pub tx: Transaction,
    /// Fee paid
    pub fee: Amount,
    /// Operation (script execution) cost
    pub op_cost: u64,
    /// Sum of input value * input confirmations
    pub coin_age: u128,
}

impl PoolEntry {
    /// Transaction id
    pub fn txid(&self) -> H256 {
        self.tx.txid()
    }

    /// Serialized size
    pub fn size(&self) -> usize {
        self.tx.serialized_size()
    }

    /// Composite ranking score: fee per kilo-cost plus coin-age priority
    pub fn score(&self, priority_divisor: u64) -> u128 {
        let fee_rate = (self.fee as u128 * 1000) / self.op_cost.max(1) as u128;
        let denom = (self.size().max(1) as u128) * priority_divisor.max(1) as u128;
        fee_rate.saturating_add(self.coin_age / denom)
    }
}

/// Wallet output that may be staked
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakeableOutput {
    /// Output reference
    pub outpoint: OutPoint,
    /// Output value
    pub value: Amount,
    /// Script of the output (principal is paid back to it)
    pub script_pubkey: Vec<u8>,
    /// Timestamp of the block that confirmed the output
    pub confirmed_at: u64,
}

/// Candidate block plus the fee/cost bookkeeping needed to finalize it
///
/// The transaction list, `fees` and `op_costs` are parallel sequences. Only
/// the header's nonce and timestamp, the block signature and (through the
/// roller/builder) the reward transaction change after construction.
#[derive(Clone, Debug)]
pub struct BlockTemplate {
    block: Block,
    fees: Vec<Amount>,
    op_costs: Vec<u64>,
    mode: ConsensusMode,
    created_at: u64,
}

impl BlockTemplate {
    pub(crate) fn new(
        block: Block,
        fees: Vec<Amount>,
        op_costs: Vec<u64>,
        mode: ConsensusMode,
        created_at: u64,
    ) -> Self {
        Self {
            block,
            fees,
            op_costs,
            mode,
            created_at,
        }
    }

    /// The candidate block
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The candidate header
    pub fn header(&self) -> &BlockHeader {
        &self.block.header
    }

    /// Per-transaction fees (reward transaction first, fee 0)
    pub fn fees(&self) -> &[Amount] {
        &self.fees
    }

    /// Per-transaction operation costs
    pub fn op_costs(&self) -> &[u64] {
        &self.op_costs
    }

    /// Consensus mode this template is for
    pub fn mode(&self) -> ConsensusMode {
        self.mode
    }

    /// Wall-clock time the template was built at
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Number of transactions including the reward transaction
    pub fn tx_count(&self) -> usize {
        self.block.transactions.len()
    }

    /// Sum of fees collected from pool transactions
    pub fn total_fees(&self) -> Amount {
        self.fees.iter().sum()
    }

    /// Sum of operation costs including the reward transaction
    pub fn total_op_cost(&self) -> u64 {
        self.op_costs.iter().sum()
    }

    /// Check if the template was built on a different tip than `tip`
    pub fn is_stale(&self, tip: &ChainTip) -> bool {
        self.block.header.parent_hash != tip.hash
    }

    /// Set the PoW nonce
    pub fn set_nonce(&mut self, nonce: u32) {
        self.block.header.nonce = nonce;
    }

    /// Set the header timestamp
    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.block.header.timestamp = timestamp;
    }

    /// Attach the block signature (PoS/PoA proof)
    pub fn set_signature(&mut self, signature: Vec<u8>) {
        self.block.signature = signature;
    }

    /// Swap in a new reward transaction and recompute the merkle root
    pub(crate) fn replace_reward(&mut self, reward: Transaction, op_cost: u64) {
        self.block.transactions[0] = reward;
        self.op_costs[0] = op_cost;
        self.block.header.merkle_root = self.block.compute_merkle_root();
    }

    /// Consume the template into the finished block
    pub fn into_block(self) -> Block {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(tag: u8) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::new(H256::repeat_byte(tag), 0),
                script_sig: vec![tag; 4],
            }],
            outputs: vec![TxOut {
                value: 1_000,
                script_pubkey: vec![0xAA; 20],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn test_consensus_mode_display() {
        assert_eq!(ConsensusMode::ProofOfWork.to_string(), "PoW");
        assert_eq!(ConsensusMode::ProofOfStake.to_string(), "PoS");
        assert_eq!(ConsensusMode::ProofOfAuthority.to_string(), "PoA");
    }

    #[test]
    fn test_null_outpoint() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new(H256::zero(), 0).is_null());
    }

    #[test]
    fn test_txid_changes_with_content() {
        assert_ne!(sample_tx(1).txid(), sample_tx(2).txid());
        assert_eq!(sample_tx(1).txid(), sample_tx(1).txid());
    }

    #[test]
    fn test_coinbase_detection() {
        let coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: vec![1, 2, 3],
            }],
            outputs: vec![TxOut {
                value: 50,
                script_pubkey: vec![1],
            }],
            lock_time: 0,
        };
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_coinstake());
        assert!(!sample_tx(1).is_coinbase());
    }

    #[test]
    fn test_coinstake_detection() {
        let mut stake = sample_tx(7);
        stake.outputs.insert(0, TxOut::empty());
        assert!(stake.is_coinstake());
        assert!(!stake.is_coinbase());
    }

    #[test]
    fn test_pool_entry_score_prefers_fee_rate() {
        let cheap = PoolEntry {
            tx: sample_tx(1),
            fee: 100,
            op_cost: 10,
            coin_age: 0,
        };
        let rich = PoolEntry {
            tx: sample_tx(2),
            fee: 1_000,
            op_cost: 10,
            coin_age: 0,
        };
        assert!(rich.score(1) > cheap.score(1));
    }

    #[test]
    fn test_pool_entry_score_counts_coin_age() {
        let young = PoolEntry {
            tx: sample_tx(1),
            fee: 100,
            op_cost: 1,
            coin_age: 0,
        };
        let old = PoolEntry {
            coin_age: 10_000_000,
            ..young.clone()
        };
        assert!(old.score(1) > young.score(1));
    }

    #[test]
    fn test_tip_extend_advances_height_and_work() {
        let genesis = ChainTip::genesis(H256::repeat_byte(1), 1_000, U256::MAX >> 8);
        let block = Block {
            header: BlockHeader {
                version: 1,
                height: 1,
                parent_hash: genesis.hash,
                merkle_root: H256::zero(),
                timestamp: 1_010,
                target: U256::MAX >> 8,
                nonce: 0,
            },
            transactions: vec![],
            signature: vec![],
        };

        let next = genesis.extend(&block, ConsensusMode::ProofOfWork);
        assert_eq!(next.height, 1);
        assert_eq!(next.hash, block.hash());
        assert!(next.chain_work > genesis.chain_work);
        assert_eq!(next.recent.len(), 2);
        assert_eq!(next.recent[0].height, 1);
        assert_ne!(next.stake_modifier, genesis.stake_modifier);
    }
}
