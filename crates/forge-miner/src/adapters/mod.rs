//! Adapters for the outbound ports
//!
//! - [`chain`]: watch-channel tip publication
//! - [`memory`]: in-memory mempool, wallet, key stores and submitter
//! - [`marker_file`]: persistent PoA period marker

pub mod chain;
pub mod marker_file;
pub mod memory;

pub use chain::WatchedChainState;
pub use marker_file::FilePeriodMarker;
pub use memory::{
    AcceptAllValidator, InMemoryKeyPool, InMemoryMempool, InMemoryPeriodMarker,
    InMemoryStakeWallet, InMemorySubmitter, StaticAuthorityKeys,
};
