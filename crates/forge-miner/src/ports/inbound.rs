//! Inbound ports (driving side - API)

use crate::domain::{BlockTemplate, ConsensusMode, Destination};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Primary port: mining control surface
#[async_trait]
pub trait MiningControl: Send + Sync {
    /// Start `threads` PoW workers, replacing any running set
    async fn start_mining(&self, threads: usize) -> Result<()>;

    /// Stop all PoW workers and wait for them to exit
    async fn stop_mining(&self) -> Result<()>;

    /// Start the PoS minter
    async fn start_staking(&self) -> Result<()>;

    /// Stop the PoS minter
    async fn stop_staking(&self) -> Result<()>;

    /// Start the PoA minter with a period of `period_secs`
    async fn start_authority_minting(&self, period_secs: u64) -> Result<()>;

    /// Stop the PoA minter
    async fn stop_authority_minting(&self) -> Result<()>;

    /// PoW attempts per second over the tracker window
    fn current_hash_rate(&self) -> f64;

    /// Build a template without starting any search
    async fn build_template(
        &self,
        mode: ConsensusMode,
        destination: Destination,
    ) -> Result<BlockTemplate>;

    /// Current status snapshot
    fn status(&self) -> MiningStatus;
}

/// Per-worker PoW state
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for a template
    Idle = 0,
    /// Searching nonce space
    Hashing = 1,
    /// Found a block and handing it off
    Found = 2,
    /// Exited
    Stopped = 3,
}

impl WorkerState {
    /// Decode from the atomic representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Hashing,
            2 => Self::Found,
            _ => Self::Stopped,
        }
    }
}

/// Mining status
#[derive(Clone, Debug, Default, Serialize)]
pub struct MiningStatus {
    /// PoW workers running
    pub pow_running: bool,

    /// Number of PoW workers
    pub pow_threads: usize,

    /// State of each PoW worker
    pub worker_states: Vec<WorkerState>,

    /// PoS minter running
    pub staking: bool,

    /// PoA period in seconds while the authority minter runs
    pub authority_period: Option<u64>,

    /// Current hash rate (attempts/s)
    pub hash_rate: f64,

    /// Blocks found by PoW workers
    pub blocks_found_pow: u64,

    /// Blocks found by the PoS minter
    pub blocks_found_pos: u64,

    /// Blocks produced by the PoA minter
    pub blocks_found_poa: u64,

    /// Found blocks rejected on submission
    pub submissions_rejected: u64,

    /// Height of the last accepted block produced here
    pub last_block_height: Option<u64>,
}
