//! PoS minter
//!
//! Polls on a fixed interval. Each tick evaluates every eligible wallet output
//! once at the current masked timestamp; an output is never evaluated again at
//! the same or an earlier timestamp. The first kernel hit turns into a signed
//! coinstake block that is submitted straight away.

use super::keys::reserve_reward_key;
use super::submit::BlockHandoff;
use crate::domain::{
    finalize_coinstake, ConsensusMode, KernelParams, OutPoint, StakeKernelCandidate,
    StakeableOutput, TemplateBuilder,
};
use crate::error::{MiningError, Result};
use crate::ports::outbound::StakeWallet;
use crate::utils::hashing::short_hex;
use crate::utils::time::unix_now;
use primitive_types::H256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Stake kernel search driver
pub struct StakeMinter {
    builder: Arc<TemplateBuilder>,
    handoff: BlockHandoff,
    wallet: Arc<dyn StakeWallet>,
    params: KernelParams,
    /// Last masked timestamp evaluated per output
    last_evaluated: HashMap<OutPoint, u64>,
    /// Tip we already produced a block on
    staked_on: Option<H256>,
    evaluations: u64,
}

impl StakeMinter {
    /// Create new stake minter
    pub fn new(
        builder: Arc<TemplateBuilder>,
        handoff: BlockHandoff,
        wallet: Arc<dyn StakeWallet>,
        params: KernelParams,
    ) -> Self {
        Self {
            builder,
            handoff,
            wallet,
            params,
            last_evaluated: HashMap::new(),
            staked_on: None,
            evaluations: 0,
        }
    }

    /// Kernel evaluations performed so far
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// One search pass at `now`
    ///
    /// Returns the hash of the submitted block on a kernel hit, `None` when
    /// nothing qualified this pass.
    pub fn try_stake(&mut self, now: u64) -> Result<Option<H256>> {
        let tip = self.builder.tip().ok_or(MiningError::NoValidTip)?;
        if self.staked_on == Some(tip.hash) {
            trace!("already staked on tip {}", short_hex(&tip.hash));
            return Ok(None);
        }

        let outputs = self.wallet.stakeable_outputs();
        self.last_evaluated
            .retain(|outpoint, _| outputs.iter().any(|o| o.outpoint == *outpoint));

        let min_timestamp = tip.min_child_timestamp();
        let candidates: Vec<(StakeKernelCandidate, &StakeableOutput)> = outputs
            .iter()
            .filter_map(|output| {
                StakeKernelCandidate::new(output, now, &self.params).map(|c| (c, output))
            })
            .filter(|(candidate, _)| candidate.timestamp >= min_timestamp)
            .collect();

        if candidates.is_empty() {
            trace!("no mature outputs to stake");
            return Ok(None);
        }

        let rules = self.builder.rules();
        let mut hit = None;
        for (candidate, output) in candidates {
            if let Some(&last) = self.last_evaluated.get(&candidate.outpoint) {
                if candidate.timestamp <= last {
                    continue;
                }
            }
            self.last_evaluated
                .insert(candidate.outpoint, candidate.timestamp);
            self.evaluations += 1;

            let target = rules.next_target(ConsensusMode::ProofOfStake, &tip, candidate.timestamp);
            if candidate.meets_target(&tip.stake_modifier, target, &self.params) {
                hit = Some((candidate, output.clone()));
                break;
            }
        }

        let Some((candidate, output)) = hit else {
            return Ok(None);
        };
        debug!(
            outpoint = %short_hex(&candidate.outpoint.txid),
            vout = candidate.outpoint.vout,
            timestamp = candidate.timestamp,
            "stake kernel found"
        );

        let key = reserve_reward_key(self.handoff.allocator())?;
        let mut template = self.builder.build_at(
            ConsensusMode::ProofOfStake,
            Some(&tip),
            key.destination(),
            candidate.timestamp,
        )?;
        finalize_coinstake(&mut template, &candidate, &output)?;
        self.handoff.metrics().record_template(template.tx_count());

        let hash = template.header().hash();
        let signature = self
            .wallet
            .sign_block(&output.outpoint, &hash)
            .ok_or_else(|| MiningError::Signing("wallet cannot sign for staked output".into()))?;
        template.set_signature(signature);

        self.handoff
            .submit(template.into_block(), ConsensusMode::ProofOfStake, key)?;
        self.staked_on = Some(tip.hash);
        Ok(Some(hash))
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(mut self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!("[forge] stake minter started");
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.try_stake(unix_now()) {
                        match &e {
                            MiningError::NoValidTip => debug!("no valid tip, waiting"),
                            // Logged by the hand-off
                            MiningError::SubmissionRejected(_) => {}
                            MiningError::RewardDestinationUnavailable => {
                                self.handoff.metrics().record_key_pool_exhausted();
                                warn!("[forge] key pool exhausted, staking paused until refilled");
                            }
                            MiningError::InvalidSelection(_) => error!("stake attempt aborted: {}", e),
                            other => warn!("stake attempt failed: {}", other),
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("[forge] stake minter stopped");
    }
}
