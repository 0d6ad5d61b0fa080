//! Outbound ports (driven side - SPI)
//!
//! Synchronous because they are called from hashing threads as well as from
//! async drivers. None of them may block on network I/O.

use crate::domain::{
    Block, ChainTip, Destination, OutPoint, PoolEntry, StakeableOutput, Transaction,
};
use crate::error::Result;
use k256::ecdsa::SigningKey;
use primitive_types::H256;
use std::sync::Arc;

/// Port: Read the current chain tip
pub trait ChainStateReader: Send + Sync {
    /// Current tip snapshot, `None` while the chain is unusable
    fn tip(&self) -> Option<Arc<ChainTip>>;
}

/// Port: Transaction validity against a tip
pub trait TransactionValidator: Send + Sync {
    /// Check if `tx` is valid on top of `tip`
    fn is_valid(&self, tx: &Transaction, tip: &ChainTip) -> bool;
}

/// Port: Snapshot of pending transactions
pub trait MempoolReader: Send + Sync {
    /// Copy of the pool at call time
    fn snapshot(&self) -> Vec<PoolEntry>;
}

/// Port: Wallet key pool backing reward destinations
pub trait WalletKeyPool: Send + Sync {
    /// Take a fresh key out of the pool, `None` if empty
    fn generate_key(&self) -> Option<Destination>;

    /// Mark a key as permanently used
    fn keep_key(&self, key: &Destination);
}

/// Port: Wallet outputs and signing for staking
pub trait StakeWallet: Send + Sync {
    /// Outputs the wallet could stake
    fn stakeable_outputs(&self) -> Vec<StakeableOutput>;

    /// Sign a block hash with the key owning `outpoint`
    fn sign_block(&self, outpoint: &OutPoint, block_hash: &H256) -> Option<Vec<u8>>;
}

/// Port: Authority keys for PoA periods
pub trait AuthorityKeyStore: Send + Sync {
    /// Signing key for `period` if this process holds that slot
    fn signing_key_for(&self, period: u64) -> Option<SigningKey>;
}

/// Port: Persistent last-produced PoA period
pub trait PeriodMarkerStore: Send + Sync {
    /// Last period a block was produced for
    fn last_produced(&self) -> Result<Option<u64>>;

    /// Record `period` as produced
    fn record(&self, period: u64) -> Result<()>;
}

/// Outcome of a block submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Block accepted
    Accepted,
    /// Block rejected with a reason
    Rejected(String),
}

/// Port: Hand found blocks to validation/relay
pub trait BlockSubmitter: Send + Sync {
    /// Submit a found block
    fn submit(&self, block: Block) -> SubmitOutcome;
}
