//! Domain layer - template construction and consensus rules
//!
//! Everything here is synchronous and free of I/O. Collaborators are reached
//! only through the traits in [`crate::ports`].
//!
//! ## Entities
//!
//! - [`BlockTemplate`]: candidate block plus per-transaction fees and costs
//! - [`ChainTip`]: immutable snapshot of the current tip
//! - [`PoolEntry`]: pending transaction with ranking bookkeeping
//!
//! ## Services
//!
//! - [`TransactionSelector`]: fee/priority selection under size and cost budgets
//! - [`TemplateBuilder`]: PoW/PoS/PoA template assembly
//! - [`NonceRoller`]: nonce and extra-nonce search space
//! - [`RetargetRules`]: per-mode target calculation
//! - [`StakeKernelCandidate`]: stake kernel evaluation
//!
//! ## Invariants
//!
//! Every template leaving the builder has passed [`invariants::check_all`]:
//! parallel fee/cost sequences, reward transaction first with fee 0, matching
//! merkle root, no duplicates, budgets respected, strictly newer than its tip.

pub mod authority;
pub mod builder;
pub mod difficulty;
mod entities;
pub mod invariants;
pub mod kernel;
pub mod roller;
pub mod selector;
pub mod subsidy;

pub use builder::{finalize_coinstake, TemplateBuilder, COINBASE_TAG};
pub use difficulty::{BlockInfo, RetargetConfig, RetargetRules, TargetAdjuster};
pub use entities::*;
pub use kernel::{KernelParams, StakeKernelCandidate};
pub use roller::{update_time, NonceRoller, TimeUpdate};
pub use selector::{Selection, SelectionConfig, TransactionSelector};
pub use subsidy::{SubsidySchedule, COIN};
