//! # Forge Miner - Block Template & Mining Engine
//!
//! **Bounded Context:** Block Production & Mining
//! **Architecture:** DDD + Hexagonal
//!
//! ## Purpose
//!
//! Builds candidate blocks and drives their completion under three consensus
//! mechanisms sharing one template builder:
//! - **PoW**: multi-threaded nonce / extra-nonce search
//! - **PoS**: interval-driven stake kernel search and coinstake signing
//! - **PoA**: one signed block per wall-clock period for the key holder
//!
//! ## Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Service / Drivers (Outer)                          │
//! │  - MiningEngine: start/stop, status, hash rate      │
//! │  - PoW thread set, PoS minter, PoA minter           │
//! │  - Reserve-key allocator, hash-rate tracker         │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Ports (Middle)                                     │
//! │  - Inbound: MiningControl                           │
//! │  - Outbound: chain state, mempool, wallet, keys,    │
//! │    period marker, block submitter                   │
//! └─────────────────────────────────────────────────────┘
//!                         │
//! ┌─────────────────────────────────────────────────────┐
//! │  Domain (Inner - Pure Logic)                        │
//! │  - TransactionSelector, TemplateBuilder             │
//! │  - NonceRoller, RetargetRules, stake kernel         │
//! │  - Invariants                                       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Critical Invariants
//!
//! 1. **Budgets**: selected size ≤ max block size, total op cost ≤ ceiling
//! 2. **Parallel bookkeeping**: one fee and one cost entry per transaction,
//!    reward first with fee 0
//! 3. **Timestamp monotonicity**: tip time < block time ≤ now + drift
//! 4. **Key exclusivity**: a reserved key backs exactly one template
//! 5. **Period guard**: at most one PoA block per period, across restarts
//!
//! ## Module Structure
//!
//! - [`domain`]: pure template construction and consensus rules
//! - [`ports`]: inbound and outbound interfaces
//! - [`adapters`]: in-memory and file-backed collaborators
//! - [`mining`]: PoW/PoS/PoA drivers and shared mining state
//! - [`service`]: the [`MiningEngine`]

#![warn(missing_docs)]
#![warn(clippy::all)]

/// In-memory and file-backed adapters
pub mod adapters;
/// Domain models and consensus rules
pub mod domain;
/// Mining drivers
pub mod mining;
pub mod ports;
pub mod service;
pub mod utils;

mod config;
mod error;
mod metrics;

pub use config::{MinerConfig, PoaConfig, PosConfig, PowConfig};
pub use error::{MiningError, Result};
pub use metrics::Metrics;

pub use domain::{
    Block, BlockHeader, BlockTemplate, ChainTip, ConsensusMode, Destination, PoolEntry,
    StakeableOutput, TemplateBuilder, TransactionSelector,
};

pub use ports::{
    AuthorityKeyStore, BlockSubmitter, ChainStateReader, MempoolReader, MiningControl,
    MiningStatus, PeriodMarkerStore, StakeWallet, SubmitOutcome, TransactionValidator,
    WalletKeyPool, WorkerState,
};

pub use service::{Collaborators, MiningEngine};

/// Forward clock tolerance for header timestamps (2 hours)
pub const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Median-time-past window (blocks)
pub const MEDIAN_TIME_SPAN: usize = 11;
