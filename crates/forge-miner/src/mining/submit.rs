//! Hand-off of found blocks
//!
//! Shared by all three drivers. An accepted block commits its reserve key;
//! a rejected one returns it. Rejections are not retried here, the caller
//! rebuilds on its next iteration.

use super::keys::{ReserveKeyAllocator, ReservedKey};
use crate::domain::{Block, ConsensusMode};
use crate::error::{MiningError, Result};
use crate::metrics::Metrics;
use crate::ports::outbound::{BlockSubmitter, SubmitOutcome};
use crate::utils::hashing::short_hex;
use std::sync::Arc;
use tracing::{info, warn};

/// Submit step shared by the drivers
#[derive(Clone)]
pub struct BlockHandoff {
    submitter: Arc<dyn BlockSubmitter>,
    allocator: ReserveKeyAllocator,
    metrics: Arc<Metrics>,
}

impl BlockHandoff {
    /// Create new hand-off step
    pub fn new(
        submitter: Arc<dyn BlockSubmitter>,
        allocator: ReserveKeyAllocator,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            submitter,
            allocator,
            metrics,
        }
    }

    /// Key allocator backing reward destinations
    pub fn allocator(&self) -> &ReserveKeyAllocator {
        &self.allocator
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Submit `block` found under `mode`, settling `key` by the outcome
    pub fn submit(&self, block: Block, mode: ConsensusMode, key: ReservedKey) -> Result<()> {
        let height = block.header.height;
        let hash = block.hash();

        match self.submitter.submit(block) {
            SubmitOutcome::Accepted => {
                self.allocator.commit(key);
                self.metrics.record_block_found(mode, height);
                info!(
                    "[forge] {} block {} accepted at height {}",
                    mode,
                    short_hex(&hash),
                    height
                );
                Ok(())
            }
            SubmitOutcome::Rejected(reason) => {
                self.allocator.return_key(key);
                self.metrics.record_rejection();
                warn!(
                    "[forge] {} block {} at height {} rejected: {}",
                    mode,
                    short_hex(&hash),
                    height,
                    reason
                );
                Err(MiningError::SubmissionRejected(reason))
            }
        }
    }
}
