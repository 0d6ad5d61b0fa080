//! Mining drivers
//!
//! - [`pow`]: threaded PoW hashing pool
//! - [`pos`]: interval-driven stake kernel search
//! - [`poa`]: period-driven authority block production
//!
//! All three share the reserve-key allocator in [`keys`] and the hand-off in
//! [`submit`]. PoW workers also feed the [`hashrate`] tracker.

pub mod hashrate;
pub mod keys;
pub mod poa;
pub mod pos;
pub mod pow;
pub mod submit;

pub use hashrate::HashRateTracker;
pub use keys::{build_with_reserved_key, KeyState, ReserveKeyAllocator, ReservedKey};
pub use poa::AuthorityMinter;
pub use pos::StakeMinter;
pub use pow::{MinerThreadSet, PowContext};
pub use submit::BlockHandoff;
