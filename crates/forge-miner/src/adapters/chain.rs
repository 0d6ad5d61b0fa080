//! Chain tip publication
//!
//! The tip is handed over as an immutable `Arc<ChainTip>` through a tokio
//! watch channel. Readers clone the `Arc` and never observe a partially
//! updated tip; only the publisher swaps it.

use crate::domain::ChainTip;
use crate::ports::outbound::ChainStateReader;
use primitive_types::H256;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Chain state backed by a watch channel
pub struct WatchedChainState {
    tip: watch::Sender<Option<Arc<ChainTip>>>,
}

impl WatchedChainState {
    /// Create with an optional initial tip
    pub fn new(initial: Option<ChainTip>) -> Self {
        let (tip, _) = watch::channel(initial.map(Arc::new));
        Self { tip }
    }

    /// Swap in a new tip
    pub fn publish(&self, tip: ChainTip) {
        debug!(height = tip.height, "publishing new tip");
        self.tip.send_replace(Some(Arc::new(tip)));
    }

    /// Swap in `extend(tip)` only while the tip is still `parent`
    ///
    /// The check and the swap happen under the channel's write lock, so of
    /// several children of one parent exactly one gets in.
    pub fn extend_from<F>(&self, parent: &H256, extend: F) -> Option<Arc<ChainTip>>
    where
        F: FnOnce(&ChainTip) -> ChainTip,
    {
        let mut extended = None;
        self.tip.send_if_modified(|current| {
            let next = match current.as_deref() {
                Some(tip) if tip.hash == *parent => Arc::new(extend(tip)),
                _ => return false,
            };
            debug!(height = next.height, "extending tip");
            *current = Some(next.clone());
            extended = Some(next);
            true
        });
        extended
    }

    /// Mark the chain unusable
    pub fn clear(&self) {
        self.tip.send_replace(None);
    }

    /// Receiver notified on every tip change
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ChainTip>>> {
        self.tip.subscribe()
    }
}

impl ChainStateReader for WatchedChainState {
    fn tip(&self) -> Option<Arc<ChainTip>> {
        self.tip.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn test_publish_swaps_snapshot() {
        let chain = WatchedChainState::new(None);
        assert!(chain.tip().is_none());

        let genesis = ChainTip::genesis(H256::repeat_byte(1), 100, U256::MAX);
        chain.publish(genesis.clone());
        let held = chain.tip().unwrap();
        assert_eq!(held.hash, genesis.hash);

        let mut next = genesis.clone();
        next.height = 1;
        next.hash = H256::repeat_byte(2);
        chain.publish(next);

        // Old snapshot untouched, new readers see the new tip
        assert_eq!(held.height, 0);
        assert_eq!(chain.tip().unwrap().height, 1);

        chain.clear();
        assert!(chain.tip().is_none());
    }

    #[tokio::test]
    async fn test_subscribers_notified() {
        let chain = WatchedChainState::new(None);
        let mut rx = chain.subscribe();
        chain.publish(ChainTip::genesis(H256::repeat_byte(1), 100, U256::MAX));
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());
    }

    #[test]
    fn test_extend_from_requires_current_parent() {
        let genesis = ChainTip::genesis(H256::repeat_byte(1), 100, U256::MAX);
        let chain = WatchedChainState::new(Some(genesis.clone()));

        let child = |hash: u8| {
            move |tip: &ChainTip| {
                let mut next = tip.clone();
                next.height = tip.height + 1;
                next.hash = H256::repeat_byte(hash);
                next
            }
        };

        let first = chain.extend_from(&genesis.hash, child(2)).unwrap();
        assert_eq!(first.height, 1);

        // Sibling on the old parent is refused
        assert!(chain.extend_from(&genesis.hash, child(3)).is_none());
        assert_eq!(chain.tip().unwrap().hash, H256::repeat_byte(2));

        chain.clear();
        assert!(chain.extend_from(&first.hash, child(4)).is_none());
    }
}
