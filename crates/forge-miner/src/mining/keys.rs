//! Reserve-key allocation for reward destinations
//!
//! A key checked out here backs exactly one template. It stays reserved until
//! it is committed (block accepted) or returned (attempt abandoned). Dropping
//! a [`ReservedKey`] that is still reserved returns it, so cancelled or
//! failed attempts never leak keys.

use crate::domain::{BlockTemplate, ConsensusMode, Destination, TemplateBuilder};
use crate::error::{MiningError, Result};
use crate::ports::outbound::WalletKeyPool;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

/// Lifecycle of a reserved key
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// Backing an in-flight template
    Reserved,
    /// Used by an accepted block
    Committed,
    /// Back in the pool
    Returned,
}

#[derive(Default)]
struct PoolState {
    /// Returned keys, reused before asking the wallet for fresh ones
    returned: VecDeque<Destination>,
    reserved: HashSet<Destination>,
}

struct Inner {
    wallet: Arc<dyn WalletKeyPool>,
    state: Mutex<PoolState>,
}

impl Inner {
    fn release(&self, key: &Destination, state: KeyState) {
        let mut pool = self.state.lock();
        if !pool.reserved.remove(key) {
            return;
        }
        match state {
            KeyState::Committed => self.wallet.keep_key(key),
            KeyState::Returned => pool.returned.push_front(key.clone()),
            KeyState::Reserved => {}
        }
    }
}

/// Reserve-key allocator shared by all miners
#[derive(Clone)]
pub struct ReserveKeyAllocator {
    inner: Arc<Inner>,
}

impl ReserveKeyAllocator {
    /// Create an allocator drawing from `wallet`
    pub fn new(wallet: Arc<dyn WalletKeyPool>) -> Self {
        Self {
            inner: Arc::new(Inner {
                wallet,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Check out a key not reserved by anyone else
    pub fn checkout(&self) -> Result<ReservedKey> {
        let mut pool = self.inner.state.lock();

        let key = loop {
            let next = pool
                .returned
                .pop_front()
                .or_else(|| self.inner.wallet.generate_key());
            match next {
                Some(key) if pool.reserved.contains(&key) => continue,
                Some(key) => break key,
                None => return Err(MiningError::KeyPoolExhausted),
            }
        };

        pool.reserved.insert(key.clone());
        trace!(reserved = pool.reserved.len(), "reserve key checked out");

        Ok(ReservedKey {
            key,
            state: KeyState::Reserved,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Mark the key as used by an accepted block
    pub fn commit(&self, mut key: ReservedKey) {
        key.finish(KeyState::Committed);
    }

    /// Put the key back for reuse
    pub fn return_key(&self, mut key: ReservedKey) {
        key.finish(KeyState::Returned);
    }

    /// Number of keys currently reserved
    pub fn reserved_count(&self) -> usize {
        self.inner.state.lock().reserved.len()
    }

    /// Check if `key` is currently reserved
    pub fn is_reserved(&self, key: &Destination) -> bool {
        self.inner.state.lock().reserved.contains(key)
    }
}

/// A key checked out for one mining attempt
pub struct ReservedKey {
    key: Destination,
    state: KeyState,
    inner: Arc<Inner>,
}

impl ReservedKey {
    /// Reward destination
    pub fn destination(&self) -> &Destination {
        &self.key
    }

    /// Current state
    pub fn state(&self) -> KeyState {
        self.state
    }

    fn finish(&mut self, state: KeyState) {
        if self.state != KeyState::Reserved {
            return;
        }
        self.inner.release(&self.key, state);
        self.state = state;
    }
}

impl std::fmt::Debug for ReservedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservedKey")
            .field("key", &self.key)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for ReservedKey {
    fn drop(&mut self) {
        if self.state == KeyState::Reserved {
            debug!("returning unused reserve key");
            self.finish(KeyState::Returned);
        }
    }
}

/// Check out a key for a reward output
pub fn reserve_reward_key(allocator: &ReserveKeyAllocator) -> Result<ReservedKey> {
    allocator.checkout().map_err(|e| match e {
        MiningError::KeyPoolExhausted => MiningError::RewardDestinationUnavailable,
        other => other,
    })
}

/// Build a template paying a freshly reserved key
///
/// The key travels with the template; it is returned automatically if the
/// build fails or the caller drops it.
pub fn build_with_reserved_key(
    builder: &TemplateBuilder,
    allocator: &ReserveKeyAllocator,
    mode: ConsensusMode,
) -> Result<(BlockTemplate, ReservedKey)> {
    let key = reserve_reward_key(allocator)?;
    let template = builder.build(mode, key.destination())?;
    Ok((template, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKeyPool;
    use std::thread;

    fn allocator(keys: usize) -> (ReserveKeyAllocator, Arc<InMemoryKeyPool>) {
        let pool = Arc::new(InMemoryKeyPool::with_generated(keys));
        (ReserveKeyAllocator::new(pool.clone()), pool)
    }

    #[test]
    fn test_checkout_until_exhausted() {
        let (alloc, _) = allocator(2);
        let a = alloc.checkout().unwrap();
        let b = alloc.checkout().unwrap();
        assert_ne!(a.destination(), b.destination());
        assert!(matches!(alloc.checkout(), Err(MiningError::KeyPoolExhausted)));
        assert_eq!(alloc.reserved_count(), 2);
    }

    #[test]
    fn test_return_then_checkout_reuses_key() {
        let (alloc, _) = allocator(3);
        let a = alloc.checkout().unwrap();
        let dest = a.destination().clone();
        alloc.return_key(a);

        let again = alloc.checkout().unwrap();
        assert_eq!(again.destination(), &dest);
    }

    #[test]
    fn test_commit_keeps_key_in_wallet() {
        let (alloc, pool) = allocator(2);
        let a = alloc.checkout().unwrap();
        let dest = a.destination().clone();
        alloc.commit(a);

        assert_eq!(pool.kept(), vec![dest.clone()]);
        assert!(!alloc.is_reserved(&dest));

        // Committed keys never come back
        let b = alloc.checkout().unwrap();
        assert_ne!(b.destination(), &dest);
    }

    #[test]
    fn test_drop_returns_reserved_key() {
        let (alloc, _) = allocator(1);
        {
            let _a = alloc.checkout().unwrap();
            assert_eq!(alloc.reserved_count(), 1);
        }
        assert_eq!(alloc.reserved_count(), 0);
        assert!(alloc.checkout().is_ok());
    }

    #[test]
    fn test_concurrent_checkouts_are_exclusive() {
        let (alloc, _) = allocator(64);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let alloc = alloc.clone();
                thread::spawn(move || {
                    (0..8)
                        .map(|_| alloc.checkout().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut held = Vec::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                assert!(seen.insert(key.destination().clone()));
                held.push(key);
            }
        }
        assert_eq!(alloc.reserved_count(), 64);
        assert!(alloc.checkout().is_err());
    }

    #[test]
    fn test_exhaustion_maps_to_destination_unavailable() {
        let (alloc, _) = allocator(0);
        assert!(matches!(
            reserve_reward_key(&alloc),
            Err(MiningError::RewardDestinationUnavailable)
        ));
    }

    #[test]
    fn test_reserved_key_not_handed_out_twice_after_refill() {
        let (alloc, pool) = allocator(1);
        let a = alloc.checkout().unwrap();
        // Wallet hands the same key out again
        pool.refill([a.destination().clone()]);
        assert!(matches!(alloc.checkout(), Err(MiningError::KeyPoolExhausted)));
    }
}
