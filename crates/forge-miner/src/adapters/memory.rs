//! In-memory collaborators for development nodes and tests

use super::chain::WatchedChainState;
use crate::domain::{
    Block, ChainTip, ConsensusMode, Destination, OutPoint, PoolEntry, StakeableOutput, Transaction,
};
use crate::error::Result;
use crate::ports::outbound::{
    AuthorityKeyStore, BlockSubmitter, ChainStateReader, MempoolReader, PeriodMarkerStore,
    StakeWallet, SubmitOutcome, TransactionValidator, WalletKeyPool,
};
use crate::utils::hashing::{hash256, meets_target};
use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use parking_lot::{Mutex, RwLock};
use primitive_types::H256;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validator that accepts every transaction
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllValidator;

impl TransactionValidator for AcceptAllValidator {
    fn is_valid(&self, _tx: &Transaction, _tip: &ChainTip) -> bool {
        true
    }
}

/// Pending pool held in memory
#[derive(Default)]
pub struct InMemoryMempool {
    entries: RwLock<Vec<PoolEntry>>,
}

impl InMemoryMempool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool holding `entries`
    pub fn with_entries(entries: Vec<PoolEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Add an entry
    pub fn add(&self, entry: PoolEntry) {
        self.entries.write().push(entry);
    }

    /// Drop entries included in `block`
    pub fn remove_included(&self, block: &Block) {
        let included: HashSet<H256> = block.transactions.iter().map(Transaction::txid).collect();
        self.entries
            .write()
            .retain(|entry| !included.contains(&entry.txid()));
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MempoolReader for InMemoryMempool {
    fn snapshot(&self) -> Vec<PoolEntry> {
        self.entries.read().clone()
    }
}

/// Wallet key pool with a fixed supply of keys
#[derive(Default)]
pub struct InMemoryKeyPool {
    available: Mutex<VecDeque<Destination>>,
    kept: Mutex<Vec<Destination>>,
}

impl InMemoryKeyPool {
    /// Create a pool holding `keys`
    pub fn new(keys: Vec<Destination>) -> Self {
        Self {
            available: Mutex::new(keys.into()),
            kept: Mutex::new(Vec::new()),
        }
    }

    /// Create a pool with `count` derived 20-byte keys
    pub fn with_generated(count: usize) -> Self {
        Self::new(
            (0..count as u64)
                .map(|i| Destination(hash256(&i.to_le_bytes()).as_bytes()[..20].to_vec()))
                .collect(),
        )
    }

    /// Add keys to the pool
    pub fn refill(&self, keys: impl IntoIterator<Item = Destination>) {
        self.available.lock().extend(keys);
    }

    /// Keys marked as used
    pub fn kept(&self) -> Vec<Destination> {
        self.kept.lock().clone()
    }

    /// Keys still available
    pub fn remaining(&self) -> usize {
        self.available.lock().len()
    }
}

impl WalletKeyPool for InMemoryKeyPool {
    fn generate_key(&self) -> Option<Destination> {
        self.available.lock().pop_front()
    }

    fn keep_key(&self, key: &Destination) {
        self.kept.lock().push(key.clone());
    }
}

/// Stake wallet holding outputs owned by a single key
pub struct InMemoryStakeWallet {
    outputs: RwLock<Vec<StakeableOutput>>,
    key: SigningKey,
}

impl InMemoryStakeWallet {
    /// Create a wallet owning `outputs`
    pub fn new(key: SigningKey, outputs: Vec<StakeableOutput>) -> Self {
        Self {
            outputs: RwLock::new(outputs),
            key,
        }
    }

    /// Add an output
    pub fn add_output(&self, output: StakeableOutput) {
        self.outputs.write().push(output);
    }

    /// Remove an output that was spent
    pub fn spend(&self, outpoint: &OutPoint) {
        self.outputs.write().retain(|o| o.outpoint != *outpoint);
    }

    /// Key signing staked blocks
    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }
}

impl StakeWallet for InMemoryStakeWallet {
    fn stakeable_outputs(&self) -> Vec<StakeableOutput> {
        self.outputs.read().clone()
    }

    fn sign_block(&self, outpoint: &OutPoint, block_hash: &H256) -> Option<Vec<u8>> {
        if !self.outputs.read().iter().any(|o| o.outpoint == *outpoint) {
            return None;
        }
        let signature: Signature = self.key.sign(block_hash.as_bytes());
        Some(signature.to_bytes().to_vec())
    }
}

/// Authority key store with one key and an optional rotation slot
pub struct StaticAuthorityKeys {
    key: Option<SigningKey>,
    slot: Option<(u64, u64)>,
}

impl StaticAuthorityKeys {
    /// Hold no authority key
    pub fn none() -> Self {
        Self {
            key: None,
            slot: None,
        }
    }

    /// Hold the key for every period
    pub fn always(key: SigningKey) -> Self {
        Self {
            key: Some(key),
            slot: None,
        }
    }

    /// Hold the key for periods where `period % slots == slot`
    pub fn rotating(key: SigningKey, slot: u64, slots: u64) -> Self {
        Self {
            key: Some(key),
            slot: Some((slot, slots.max(1))),
        }
    }
}

impl AuthorityKeyStore for StaticAuthorityKeys {
    fn signing_key_for(&self, period: u64) -> Option<SigningKey> {
        let key = self.key.as_ref()?;
        match self.slot {
            Some((slot, slots)) if period % slots != slot => None,
            _ => Some(key.clone()),
        }
    }
}

/// Period marker kept in memory (lost on restart)
#[derive(Default)]
pub struct InMemoryPeriodMarker {
    last: Mutex<Option<u64>>,
}

impl InMemoryPeriodMarker {
    /// Create a marker, optionally already at `last`
    pub fn new(last: Option<u64>) -> Self {
        Self {
            last: Mutex::new(last),
        }
    }
}

impl PeriodMarkerStore for InMemoryPeriodMarker {
    fn last_produced(&self) -> Result<Option<u64>> {
        Ok(*self.last.lock())
    }

    fn record(&self, period: u64) -> Result<()> {
        let mut last = self.last.lock();
        *last = Some(last.map_or(period, |p| p.max(period)));
        Ok(())
    }
}

/// Submitter that accepts blocks extending the current tip
///
/// Accepted blocks are recorded and, when attached to a chain, become the
/// new tip. Mempool entries and staked outputs they spend are removed.
pub struct InMemorySubmitter {
    chain: Option<Arc<WatchedChainState>>,
    mempool: Option<Arc<InMemoryMempool>>,
    stake_wallet: Option<Arc<InMemoryStakeWallet>>,
    accepted: Mutex<Vec<Block>>,
    rejected: Mutex<Vec<String>>,
    reject_next: Mutex<Option<String>>,
    submit_lock: Mutex<()>,
}

impl InMemorySubmitter {
    /// Record blocks without advancing any chain
    pub fn detached() -> Self {
        Self {
            chain: None,
            mempool: None,
            stake_wallet: None,
            accepted: Mutex::new(Vec::new()),
            rejected: Mutex::new(Vec::new()),
            reject_next: Mutex::new(None),
            submit_lock: Mutex::new(()),
        }
    }

    /// Advance `chain` on every accepted block
    pub fn attached(chain: Arc<WatchedChainState>) -> Self {
        Self {
            chain: Some(chain),
            ..Self::detached()
        }
    }

    /// Also prune `mempool` of included transactions
    pub fn with_mempool(mut self, mempool: Arc<InMemoryMempool>) -> Self {
        self.mempool = Some(mempool);
        self
    }

    /// Also spend staked outputs from `wallet`
    pub fn with_stake_wallet(mut self, wallet: Arc<InMemoryStakeWallet>) -> Self {
        self.stake_wallet = Some(wallet);
        self
    }

    /// Reject the next submission with `reason`
    pub fn reject_next(&self, reason: impl Into<String>) {
        *self.reject_next.lock() = Some(reason.into());
    }

    /// Accepted blocks in submission order
    pub fn accepted(&self) -> Vec<Block> {
        self.accepted.lock().clone()
    }

    /// Rejection reasons in submission order
    pub fn rejected(&self) -> Vec<String> {
        self.rejected.lock().clone()
    }

    fn reject(&self, reason: String) -> SubmitOutcome {
        warn!("block rejected: {}", reason);
        self.rejected.lock().push(reason.clone());
        SubmitOutcome::Rejected(reason)
    }
}

/// Consensus mode a finished block was produced under
fn mode_of(block: &Block) -> ConsensusMode {
    match block.reward_transaction() {
        Some(tx) if tx.is_coinstake() => ConsensusMode::ProofOfStake,
        _ if !block.signature.is_empty() => ConsensusMode::ProofOfAuthority,
        _ => ConsensusMode::ProofOfWork,
    }
}

impl BlockSubmitter for InMemorySubmitter {
    fn submit(&self, block: Block) -> SubmitOutcome {
        if let Some(reason) = self.reject_next.lock().take() {
            return self.reject(reason);
        }

        let mode = mode_of(&block);
        if mode == ConsensusMode::ProofOfWork && !meets_target(&block.hash(), block.header.target) {
            return self.reject("high-hash".into());
        }

        // One submission at a time keeps `accepted` in chain order
        let _guard = self.submit_lock.lock();

        if let Some(chain) = &self.chain {
            if chain.tip().is_none() {
                return self.reject("no chain tip".into());
            }
            let extended =
                chain.extend_from(&block.header.parent_hash, |tip| tip.extend(&block, mode));
            if extended.is_none() {
                return self.reject("stale: parent is not the current tip".into());
            }

            info!(
                height = block.header.height,
                hash = %hex::encode(&block.hash().as_bytes()[..8]),
                "accepted {} block",
                mode
            );
        } else {
            debug!(height = block.header.height, "recorded {} block", mode);
        }

        if let Some(mempool) = &self.mempool {
            mempool.remove_included(&block);
        }
        if let (Some(wallet), Some(reward)) = (&self.stake_wallet, block.reward_transaction()) {
            if reward.is_coinstake() {
                for input in &reward.inputs {
                    wallet.spend(&input.prevout);
                }
            }
        }

        self.accepted.lock().push(block);
        SubmitOutcome::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authority::signing_key_from_bytes;
    use crate::domain::{BlockHeader, TxIn, TxOut};
    use primitive_types::U256;
    use std::sync::Barrier;
    use std::thread;

    fn block_on(tip: &ChainTip, target: U256) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: 1,
                height: tip.height + 1,
                parent_hash: tip.hash,
                merkle_root: H256::zero(),
                timestamp: tip.timestamp + 1,
                target,
                nonce: 0,
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxIn {
                    prevout: OutPoint::null(),
                    script_sig: vec![1],
                }],
                outputs: vec![TxOut {
                    value: 1,
                    script_pubkey: vec![2],
                }],
                lock_time: 0,
            }],
            signature: vec![],
        };
        block.header.merkle_root = block.compute_merkle_root();
        block
    }

    #[test]
    fn test_key_pool_fifo_and_keep() {
        let pool = InMemoryKeyPool::with_generated(2);
        let a = pool.generate_key().unwrap();
        let b = pool.generate_key().unwrap();
        assert_ne!(a, b);
        assert!(pool.generate_key().is_none());

        pool.keep_key(&a);
        assert_eq!(pool.kept(), vec![a]);

        pool.refill([b.clone()]);
        assert_eq!(pool.generate_key(), Some(b));
    }

    #[test]
    fn test_rotating_authority_slots() {
        let key = signing_key_from_bytes(&[7u8; 32]).unwrap();
        let keys = StaticAuthorityKeys::rotating(key, 1, 3);
        assert!(keys.signing_key_for(1).is_some());
        assert!(keys.signing_key_for(4).is_some());
        assert!(keys.signing_key_for(2).is_none());
        assert!(StaticAuthorityKeys::none().signing_key_for(1).is_none());
    }

    #[test]
    fn test_memory_marker_never_moves_back() {
        let marker = InMemoryPeriodMarker::default();
        assert_eq!(marker.last_produced().unwrap(), None);
        marker.record(5).unwrap();
        marker.record(3).unwrap();
        assert_eq!(marker.last_produced().unwrap(), Some(5));
    }

    #[test]
    fn test_stake_wallet_signs_owned_outputs_only() {
        let key = signing_key_from_bytes(&[9u8; 32]).unwrap();
        let owned = OutPoint::new(H256::repeat_byte(1), 0);
        let wallet = InMemoryStakeWallet::new(
            key,
            vec![StakeableOutput {
                outpoint: owned,
                value: 10,
                script_pubkey: vec![],
                confirmed_at: 0,
            }],
        );
        assert!(wallet.sign_block(&owned, &H256::zero()).is_some());
        assert!(wallet
            .sign_block(&OutPoint::new(H256::repeat_byte(2), 0), &H256::zero())
            .is_none());
    }

    #[test]
    fn test_submitter_advances_tip_and_rejects_stale() {
        let genesis = ChainTip::genesis(H256::repeat_byte(1), 1_000, U256::MAX);
        let chain = Arc::new(WatchedChainState::new(Some(genesis.clone())));
        let submitter = InMemorySubmitter::attached(chain.clone());

        let block = block_on(&genesis, U256::MAX);
        assert_eq!(submitter.submit(block.clone()), SubmitOutcome::Accepted);
        assert_eq!(chain.tip().unwrap().hash, block.hash());

        // Same parent again: tip has moved
        let stale = block_on(&genesis, U256::MAX);
        assert!(matches!(submitter.submit(stale), SubmitOutcome::Rejected(_)));
        assert_eq!(submitter.accepted().len(), 1);
        assert_eq!(submitter.rejected().len(), 1);
    }

    #[test]
    fn test_concurrent_siblings_only_one_accepted() {
        const SIBLINGS: usize = 8;

        for _ in 0..50 {
            let genesis = ChainTip::genesis(H256::repeat_byte(1), 1_000, U256::MAX);
            let chain = Arc::new(WatchedChainState::new(Some(genesis.clone())));
            let submitter = Arc::new(InMemorySubmitter::attached(chain.clone()));
            let barrier = Arc::new(Barrier::new(SIBLINGS));

            let handles: Vec<_> = (0..SIBLINGS as u32)
                .map(|nonce| {
                    let mut block = block_on(&genesis, U256::MAX);
                    block.header.nonce = nonce;
                    let submitter = submitter.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        submitter.submit(block)
                    })
                })
                .collect();

            let accepted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|outcome| *outcome == SubmitOutcome::Accepted)
                .count();

            assert_eq!(accepted, 1);
            assert_eq!(submitter.accepted().len(), 1);
            assert_eq!(submitter.rejected().len(), SIBLINGS - 1);
            let tip = chain.tip().unwrap();
            assert_eq!(tip.height, 1);
            assert_eq!(tip.hash, submitter.accepted()[0].hash());
        }
    }

    #[test]
    fn test_submitter_checks_pow() {
        let genesis = ChainTip::genesis(H256::repeat_byte(1), 1_000, U256::MAX);
        let submitter = InMemorySubmitter::detached();
        let block = block_on(&genesis, U256::zero());
        assert_eq!(
            submitter.submit(block),
            SubmitOutcome::Rejected("high-hash".into())
        );
    }

    #[test]
    fn test_submitter_forced_rejection() {
        let genesis = ChainTip::genesis(H256::repeat_byte(1), 1_000, U256::MAX);
        let submitter = InMemorySubmitter::detached();
        submitter.reject_next("tip moved");
        assert_eq!(
            submitter.submit(block_on(&genesis, U256::MAX)),
            SubmitOutcome::Rejected("tip moved".into())
        );
        assert_eq!(
            submitter.submit(block_on(&genesis, U256::MAX)),
            SubmitOutcome::Accepted
        );
    }
}
