//! PoA minter
//!
//! Wakes at every period boundary. If this process holds the authority key
//! for the period and the period marker says it is still open, it builds a
//! template, signs the header and submits. The marker is written before the
//! hand-off, so a crash in between costs the period its block instead of
//! producing two.

use super::keys::reserve_reward_key;
use super::submit::BlockHandoff;
use crate::domain::authority::{next_boundary, period_is_open, period_number, sign_header};
use crate::domain::{ConsensusMode, TemplateBuilder};
use crate::error::{MiningError, Result};
use crate::ports::outbound::{AuthorityKeyStore, PeriodMarkerStore};
use crate::utils::time::unix_now;
use primitive_types::H256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Authority block driver
pub struct AuthorityMinter {
    builder: Arc<TemplateBuilder>,
    handoff: BlockHandoff,
    keys: Arc<dyn AuthorityKeyStore>,
    marker: Arc<dyn PeriodMarkerStore>,
    period_secs: u64,
}

impl AuthorityMinter {
    /// Create new authority minter
    pub fn new(
        builder: Arc<TemplateBuilder>,
        handoff: BlockHandoff,
        keys: Arc<dyn AuthorityKeyStore>,
        marker: Arc<dyn PeriodMarkerStore>,
        period_secs: u64,
    ) -> Result<Self> {
        if period_secs == 0 {
            return Err(MiningError::InvalidConfig("PoA period must be > 0".into()));
        }
        Ok(Self {
            builder,
            handoff,
            keys,
            marker,
            period_secs,
        })
    }

    /// Period length in seconds
    pub fn period_secs(&self) -> u64 {
        self.period_secs
    }

    /// Produce the block for the period containing `now`, if it is ours
    ///
    /// Returns the hash of the submitted block, or `None` when the period was
    /// already produced or this process does not hold its key.
    pub fn try_mint(&self, now: u64) -> Result<Option<H256>> {
        let period = period_number(now, self.period_secs);

        if !period_is_open(self.marker.last_produced()?, period) {
            trace!(period, "period already produced");
            return Ok(None);
        }
        let Some(signing_key) = self.keys.signing_key_for(period) else {
            debug!(period, "not the authority for this period");
            return Ok(None);
        };

        let tip = self.builder.tip().ok_or(MiningError::NoValidTip)?;
        let key = reserve_reward_key(self.handoff.allocator())?;
        let mut template = self.builder.build_at(
            ConsensusMode::ProofOfAuthority,
            Some(&tip),
            key.destination(),
            now,
        )?;
        self.handoff.metrics().record_template(template.tx_count());

        let signature = sign_header(&signing_key, template.header());
        template.set_signature(signature);
        let hash = template.header().hash();

        self.marker.record(period)?;
        info!(
            "[forge] producing PoA block for period {} at height {}",
            period,
            template.header().height
        );
        self.handoff
            .submit(template.into_block(), ConsensusMode::ProofOfAuthority, key)?;
        Ok(Some(hash))
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[forge] authority minter started ({}s periods)",
            self.period_secs
        );

        loop {
            let now = unix_now();
            if let Err(e) = self.try_mint(now) {
                match &e {
                    MiningError::NoValidTip => debug!("no valid tip, waiting"),
                    MiningError::SubmissionRejected(_) => {}
                    MiningError::RewardDestinationUnavailable => {
                        self.handoff.metrics().record_key_pool_exhausted();
                        warn!("[forge] key pool exhausted, skipping authority period");
                    }
                    MiningError::InvalidSelection(_) | MiningError::PeriodMarker(_) => {
                        error!("authority attempt aborted: {}", e)
                    }
                    other => warn!("authority attempt failed: {}", other),
                }
            }

            let wait = next_boundary(now, self.period_secs).saturating_sub(now).max(1);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("[forge] authority minter stopped");
    }
}
