//! Fee/priority transaction selection
//!
//! Greedy selection over a pool snapshot. Entries are ranked by
//! `fee * 1000 / op_cost + coin_age / (size * priority_divisor)`, ties broken by
//! ascending txid. An entry that spends another pool entry waits until that
//! parent is placed and then goes in right behind it. Selection stops at the
//! first candidate that would overflow the size or operation-cost budget.

use super::entities::{Amount, ChainTip, PoolEntry, Transaction};
use primitive_types::H256;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Selection budgets and ranking parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Maximum serialized size of the selected transactions (reward excluded)
    pub max_block_size: usize,

    /// Maximum cumulative operation cost (reward included)
    pub max_block_op_cost: u64,

    /// Divisor applied to coin-age priority
    pub priority_divisor: u64,

    /// Entries paying less than this are never selected
    pub min_fee: Amount,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_block_size: 1_000_000,
            max_block_op_cost: 20_000,
            priority_divisor: 250,
            min_fee: 0,
        }
    }
}

/// Result of one selection pass
#[derive(Clone, Debug, Default)]
pub struct Selection {
    /// Selected entries in block order
    pub entries: Vec<PoolEntry>,
    /// Sum of serialized sizes of `entries`
    pub total_size: usize,
    /// Sum of operation costs including the reward transaction
    pub total_op_cost: u64,
    /// Sum of fees of `entries`
    pub total_fees: Amount,
    /// Entries rejected by the validator, the fee floor or as duplicates
    pub rejected: usize,
    /// Entries whose parents were never placed
    pub orphaned: usize,
}

#[derive(Debug)]
struct Ranked {
    score: u128,
    txid: H256,
    idx: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    // Max-heap: higher score first, then lower txid
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.txid.cmp(&self.txid))
    }
}

/// Transaction selector
#[derive(Clone, Debug)]
pub struct TransactionSelector {
    config: SelectionConfig,
}

impl TransactionSelector {
    /// Create new transaction selector
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Budgets in use
    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Select transactions from a pool snapshot
    ///
    /// `reward_op_cost` is charged against the cost ceiling before anything
    /// else. `is_valid` is consulted once per entry, before ranking.
    #[tracing::instrument(skip(self, pool, tip, is_valid), fields(pool_size = pool.len(), height = tip.height + 1))]
    pub fn select<F>(
        &self,
        pool: Vec<PoolEntry>,
        tip: &ChainTip,
        reward_op_cost: u64,
        is_valid: F,
    ) -> Selection
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut selection = Selection {
            total_op_cost: reward_op_cost,
            ..Default::default()
        };

        // Every pool txid, valid or not: spending a rejected entry orphans the child
        let mut seen: HashSet<H256> = HashSet::with_capacity(pool.len());
        let mut pool_ids: HashSet<H256> = HashSet::with_capacity(pool.len());
        let mut entries: Vec<(H256, PoolEntry)> = Vec::with_capacity(pool.len());

        for entry in pool {
            let txid = entry.txid();
            pool_ids.insert(txid);
            if !seen.insert(txid)
                || entry.tx.is_coinbase()
                || entry.fee < self.config.min_fee
                || !is_valid(&entry.tx)
            {
                selection.rejected += 1;
                continue;
            }
            entries.push((txid, entry));
        }

        let index: HashMap<H256, usize> = entries
            .iter()
            .enumerate()
            .map(|(idx, (txid, _))| (*txid, idx))
            .collect();

        // Unplaced in-pool parents per entry, and the reverse edges
        let mut pending: Vec<usize> = vec![0; entries.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
        let mut blocked: Vec<bool> = vec![false; entries.len()];

        for (idx, (_, entry)) in entries.iter().enumerate() {
            let parents: HashSet<H256> = entry
                .tx
                .inputs
                .iter()
                .map(|input| input.prevout.txid)
                .filter(|parent| pool_ids.contains(parent))
                .collect();

            for parent in parents {
                match index.get(&parent) {
                    Some(&parent_idx) if parent_idx != idx => {
                        pending[idx] += 1;
                        children[parent_idx].push(idx);
                    }
                    // Parent rejected, or the entry spends itself
                    _ => blocked[idx] = true,
                }
            }
        }

        let divisor = self.config.priority_divisor;
        let rank = |idx: usize| Ranked {
            score: entries[idx].1.score(divisor),
            txid: entries[idx].0,
            idx,
        };

        let mut heap: BinaryHeap<Ranked> = (0..entries.len())
            .filter(|&idx| pending[idx] == 0 && !blocked[idx])
            .map(rank)
            .collect();

        let mut placed: Vec<usize> = Vec::new();
        let mut overflowed = false;

        'outer: while let Some(top) = heap.pop() {
            let mut queue = VecDeque::from([top.idx]);

            while let Some(idx) = queue.pop_front() {
                let entry = &entries[idx].1;
                let size = entry.size();
                let next_size = selection.total_size.saturating_add(size);
                let next_cost = selection.total_op_cost.saturating_add(entry.op_cost);

                if next_size > self.config.max_block_size
                    || next_cost > self.config.max_block_op_cost
                {
                    tracing::debug!(
                        txid = %hex::encode(&entries[idx].0.as_bytes()[..8]),
                        size,
                        op_cost = entry.op_cost,
                        "budget reached, stopping selection"
                    );
                    overflowed = true;
                    break 'outer;
                }

                selection.total_size = next_size;
                selection.total_op_cost = next_cost;
                selection.total_fees = selection.total_fees.saturating_add(entry.fee);
                placed.push(idx);

                // Children whose last parent this was go in right behind it
                let mut ready: Vec<Ranked> = Vec::new();
                for &child in &children[idx] {
                    pending[child] -= 1;
                    if pending[child] == 0 && !blocked[child] {
                        ready.push(rank(child));
                    }
                }
                ready.sort_by(|a, b| b.cmp(a));
                queue.extend(ready.into_iter().map(|r| r.idx));
            }
        }

        selection.orphaned = if overflowed {
            0
        } else {
            entries.len() - placed.len()
        };

        let mut slots: Vec<Option<PoolEntry>> = entries.into_iter().map(|(_, e)| Some(e)).collect();
        selection.entries = placed
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();

        tracing::debug!(
            selected = selection.entries.len(),
            size = selection.total_size,
            op_cost = selection.total_op_cost,
            fees = selection.total_fees,
            rejected = selection.rejected,
            orphaned = selection.orphaned,
            "transaction selection complete"
        );

        selection
    }
}
