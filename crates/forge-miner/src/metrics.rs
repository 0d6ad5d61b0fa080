//! Metrics collection for the mining engine

use crate::domain::ConsensusMode;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector
#[derive(Debug, Default)]
pub struct Metrics {
    /// Templates built (all modes)
    pub templates_built: AtomicU64,

    /// Pool transactions included in built templates
    pub transactions_included: AtomicU64,

    /// Blocks found by PoW workers and accepted
    pub blocks_found_pow: AtomicU64,

    /// Blocks found by the PoS minter and accepted
    pub blocks_found_pos: AtomicU64,

    /// Blocks produced by the PoA minter and accepted
    pub blocks_found_poa: AtomicU64,

    /// Found blocks rejected on submission
    pub submissions_rejected: AtomicU64,

    /// Attempts that found no reserve key
    pub key_pool_exhausted: AtomicU64,

    /// Templates abandoned because the tip moved
    pub stale_templates: AtomicU64,

    /// Height of the last accepted block (0 = none)
    pub last_block_height: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a built template
    pub fn record_template(&self, tx_count: usize) {
        self.templates_built.fetch_add(1, Ordering::Relaxed);
        self.transactions_included
            .fetch_add(tx_count.saturating_sub(1) as u64, Ordering::Relaxed);
    }

    /// Record an accepted block
    pub fn record_block_found(&self, mode: ConsensusMode, height: u64) {
        let counter = match mode {
            ConsensusMode::ProofOfWork => &self.blocks_found_pow,
            ConsensusMode::ProofOfStake => &self.blocks_found_pos,
            ConsensusMode::ProofOfAuthority => &self.blocks_found_poa,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_block_height.fetch_max(height, Ordering::Relaxed);
    }

    /// Record a rejected submission
    pub fn record_rejection(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a key pool exhaustion
    pub fn record_key_pool_exhausted(&self) {
        self.key_pool_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a template abandoned on tip change
    pub fn record_stale_template(&self) {
        self.stale_templates.fetch_add(1, Ordering::Relaxed);
    }

    /// Accepted blocks for `mode`
    pub fn blocks_found(&self, mode: ConsensusMode) -> u64 {
        match mode {
            ConsensusMode::ProofOfWork => self.blocks_found_pow.load(Ordering::Relaxed),
            ConsensusMode::ProofOfStake => self.blocks_found_pos.load(Ordering::Relaxed),
            ConsensusMode::ProofOfAuthority => self.blocks_found_poa.load(Ordering::Relaxed),
        }
    }

    /// Get rejected submissions
    pub fn get_rejections(&self) -> u64 {
        self.submissions_rejected.load(Ordering::Relaxed)
    }

    /// Height of the last accepted block
    pub fn get_last_block_height(&self) -> Option<u64> {
        match self.last_block_height.load(Ordering::Relaxed) {
            0 => None,
            h => Some(h),
        }
    }

    /// Get average pool transactions per template
    pub fn get_avg_transactions_per_template(&self) -> f64 {
        let templates = self.templates_built.load(Ordering::Relaxed);
        if templates == 0 {
            return 0.0;
        }
        let txs = self.transactions_included.load(Ordering::Relaxed);
        txs as f64 / templates as f64
    }
}
