//! Concrete mining engine
//!
//! Owns the process-wide mining state (PoW thread set, PoS and PoA driver
//! tasks, hash-rate tracker, key allocator, metrics) and exposes it through
//! [`MiningControl`].

use crate::{
    config::MinerConfig,
    domain::{BlockTemplate, ConsensusMode, Destination, RetargetRules, TemplateBuilder},
    error::{MiningError, Result},
    metrics::Metrics,
    mining::{
        AuthorityMinter, BlockHandoff, HashRateTracker, MinerThreadSet, PowContext,
        ReserveKeyAllocator, StakeMinter,
    },
    ports::{
        AuthorityKeyStore, BlockSubmitter, ChainStateReader, MempoolReader, MiningControl,
        MiningStatus, PeriodMarkerStore, StakeWallet, TransactionValidator, WalletKeyPool,
    },
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// External collaborators the engine is wired to
pub struct Collaborators {
    /// Chain tip source
    pub chain: Arc<dyn ChainStateReader>,
    /// Pending transaction source
    pub mempool: Arc<dyn MempoolReader>,
    /// Transaction validity oracle
    pub validator: Arc<dyn TransactionValidator>,
    /// Reward destination keys
    pub key_pool: Arc<dyn WalletKeyPool>,
    /// Stakeable outputs and block signing for PoS
    pub stake_wallet: Arc<dyn StakeWallet>,
    /// Authority keys for PoA
    pub authority_keys: Arc<dyn AuthorityKeyStore>,
    /// Last produced PoA period
    pub period_marker: Arc<dyn PeriodMarkerStore>,
    /// Found block sink
    pub submitter: Arc<dyn BlockSubmitter>,
}

/// Handle on a timer-driven driver task
struct DriverHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    async fn stop(self, name: &str) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }
}

/// Stop a thread set and wait for its workers off the async runtime
async fn join_thread_set(set: MinerThreadSet) -> Result<()> {
    tokio::task::spawn_blocking(move || set.shutdown())
        .await
        .map_err(|e| MiningError::Internal(format!("PoW shutdown failed: {}", e)))
}

/// Mining engine implementing [`MiningControl`]
pub struct MiningEngine {
    config: MinerConfig,
    builder: Arc<TemplateBuilder>,
    handoff: BlockHandoff,
    tracker: Arc<HashRateTracker>,
    stake_wallet: Arc<dyn StakeWallet>,
    authority_keys: Arc<dyn AuthorityKeyStore>,
    period_marker: Arc<dyn PeriodMarkerStore>,
    pow: Mutex<Option<MinerThreadSet>>,
    pos: Mutex<Option<DriverHandle>>,
    poa: Mutex<Option<(u64, DriverHandle)>>,
}

impl MiningEngine {
    /// Create a new mining engine
    pub fn new(config: MinerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        info!("[forge] initializing mining engine");
        info!("  Max block size: {}", config.selection.max_block_size);
        info!("  Max block op cost: {}", config.selection.max_block_op_cost);
        info!("  Block version: {}", config.block_version);

        let builder = Arc::new(TemplateBuilder::new(
            collaborators.chain,
            collaborators.mempool,
            collaborators.validator,
            config.selection.clone(),
            RetargetRules::new(config.pow_difficulty.clone(), config.pos_difficulty.clone()),
            config.subsidy.clone(),
            config.block_version,
        ));
        let handoff = BlockHandoff::new(
            collaborators.submitter,
            ReserveKeyAllocator::new(collaborators.key_pool),
            Arc::new(Metrics::new()),
        );
        let tracker = Arc::new(HashRateTracker::new(Duration::from_secs(
            config.hashrate_window_secs,
        )));

        Ok(Self {
            config,
            builder,
            handoff,
            tracker,
            stake_wallet: collaborators.stake_wallet,
            authority_keys: collaborators.authority_keys,
            period_marker: collaborators.period_marker,
            pow: Mutex::new(None),
            pos: Mutex::new(None),
            poa: Mutex::new(None),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.handoff.metrics()
    }

    /// Reserve-key allocator
    pub fn allocator(&self) -> &ReserveKeyAllocator {
        self.handoff.allocator()
    }

    /// Stop every driver
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_mining().await?;
        self.stop_staking().await?;
        self.stop_authority_minting().await?;
        info!("[forge] mining engine stopped");
        Ok(())
    }
}

#[async_trait]
impl MiningControl for MiningEngine {
    async fn start_mining(&self, threads: usize) -> Result<()> {
        self.stop_mining().await?;
        if threads == 0 {
            return Ok(());
        }

        let ctx = Arc::new(PowContext::new(
            self.builder.clone(),
            self.handoff.clone(),
            self.tracker.clone(),
            self.config.pow.clone(),
            self.config.max_future_drift_secs,
        ));
        self.tracker.restart();
        let set = MinerThreadSet::spawn(ctx, threads)?;

        // A concurrent start may have filled the slot meanwhile; the newest set wins
        let racing = self.pow.lock().replace(set);
        match racing {
            Some(racing) => join_thread_set(racing).await,
            None => Ok(()),
        }
    }

    async fn stop_mining(&self) -> Result<()> {
        let set = self.pow.lock().take();
        match set {
            Some(set) => join_thread_set(set).await,
            None => Ok(()),
        }
    }

    async fn start_staking(&self) -> Result<()> {
        let mut slot = self.pos.lock();
        if slot.is_some() {
            return Err(MiningError::AlreadyRunning("stake minter"));
        }

        let minter = StakeMinter::new(
            self.builder.clone(),
            self.handoff.clone(),
            self.stake_wallet.clone(),
            self.config.pos.kernel_params(),
        );
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(minter.run(self.config.pos.poll_interval(), rx));
        *slot = Some(DriverHandle { shutdown, task });
        Ok(())
    }

    async fn stop_staking(&self) -> Result<()> {
        let handle = self.pos.lock().take();
        if let Some(handle) = handle {
            handle.stop("stake minter").await;
        }
        Ok(())
    }

    async fn start_authority_minting(&self, period_secs: u64) -> Result<()> {
        let mut slot = self.poa.lock();
        if slot.is_some() {
            return Err(MiningError::AlreadyRunning("authority minter"));
        }

        let minter = AuthorityMinter::new(
            self.builder.clone(),
            self.handoff.clone(),
            self.authority_keys.clone(),
            self.period_marker.clone(),
            period_secs,
        )?;
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(minter.run(rx));
        *slot = Some((period_secs, DriverHandle { shutdown, task }));
        Ok(())
    }

    async fn stop_authority_minting(&self) -> Result<()> {
        let handle = self.poa.lock().take();
        if let Some((_, handle)) = handle {
            handle.stop("authority minter").await;
        }
        Ok(())
    }

    fn current_hash_rate(&self) -> f64 {
        if self.pow.lock().is_none() {
            return 0.0;
        }
        self.tracker.rate()
    }

    async fn build_template(
        &self,
        mode: ConsensusMode,
        destination: Destination,
    ) -> Result<BlockTemplate> {
        let template = self.builder.build(mode, &destination)?;
        self.metrics().record_template(template.tx_count());
        Ok(template)
    }

    fn status(&self) -> MiningStatus {
        let worker_states = self
            .pow
            .lock()
            .as_ref()
            .map(MinerThreadSet::states)
            .unwrap_or_default();
        let metrics = self.metrics();

        MiningStatus {
            pow_running: !worker_states.is_empty(),
            pow_threads: worker_states.len(),
            worker_states,
            staking: self.pos.lock().is_some(),
            authority_period: self.poa.lock().as_ref().map(|(period, _)| *period),
            hash_rate: self.current_hash_rate(),
            blocks_found_pow: metrics.blocks_found(ConsensusMode::ProofOfWork),
            blocks_found_pos: metrics.blocks_found(ConsensusMode::ProofOfStake),
            blocks_found_poa: metrics.blocks_found(ConsensusMode::ProofOfAuthority),
            submissions_rejected: metrics.get_rejections(),
            last_block_height: metrics.get_last_block_height(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        AcceptAllValidator, InMemoryKeyPool, InMemoryMempool, InMemoryPeriodMarker,
        InMemoryStakeWallet, InMemorySubmitter, StaticAuthorityKeys, WatchedChainState,
    };
    use crate::domain::authority::signing_key_from_bytes;
    use crate::domain::ChainTip;
    use crate::ports::WorkerState;
    use crate::utils::time::unix_now;
    use primitive_types::{H256, U256};

    fn engine(config: MinerConfig) -> (MiningEngine, Arc<WatchedChainState>) {
        let genesis = ChainTip::genesis(H256::repeat_byte(9), unix_now() - 600, U256::MAX >> 2);
        let chain = Arc::new(WatchedChainState::new(Some(genesis)));
        let key = signing_key_from_bytes(&[0x55; 32]).unwrap();
        let engine = MiningEngine::new(
            config,
            Collaborators {
                chain: chain.clone(),
                mempool: Arc::new(InMemoryMempool::new()),
                validator: Arc::new(AcceptAllValidator),
                key_pool: Arc::new(InMemoryKeyPool::with_generated(32)),
                stake_wallet: Arc::new(InMemoryStakeWallet::new(key, vec![])),
                authority_keys: Arc::new(StaticAuthorityKeys::none()),
                period_marker: Arc::new(InMemoryPeriodMarker::default()),
                submitter: Arc::new(InMemorySubmitter::attached(chain.clone())),
            },
        )
        .unwrap();
        (engine, chain)
    }

    fn hard_pow_config() -> MinerConfig {
        let mut config = MinerConfig::default();
        config.pow.hash_batch = 256;
        config.pow.retry_delay_ms = 10;
        config.pow_difficulty.initial_target = U256::zero();
        config.pow_difficulty.hardest_target = U256::zero();
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = MinerConfig::default();
        config.selection.max_block_size = 0;
        let genesis = ChainTip::genesis(H256::zero(), 0, U256::MAX);
        let chain = Arc::new(WatchedChainState::new(Some(genesis)));
        let key = signing_key_from_bytes(&[0x55; 32]).unwrap();
        let result = MiningEngine::new(
            config,
            Collaborators {
                chain: chain.clone(),
                mempool: Arc::new(InMemoryMempool::new()),
                validator: Arc::new(AcceptAllValidator),
                key_pool: Arc::new(InMemoryKeyPool::default()),
                stake_wallet: Arc::new(InMemoryStakeWallet::new(key, vec![])),
                authority_keys: Arc::new(StaticAuthorityKeys::none()),
                period_marker: Arc::new(InMemoryPeriodMarker::default()),
                submitter: Arc::new(InMemorySubmitter::attached(chain)),
            },
        );
        assert!(matches!(result, Err(MiningError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_build_template_preview() {
        let (engine, _) = engine(MinerConfig::default());
        let template = engine
            .build_template(ConsensusMode::ProofOfWork, Destination(vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(template.header().height, 1);
        assert_eq!(template.fees(), &[0]);
        assert_eq!(
            engine.metrics().templates_built.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        // Preview never touches the key pool
        assert_eq!(engine.allocator().reserved_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_and_stop_mining() {
        let (engine, _) = engine(hard_pow_config());
        assert_eq!(engine.current_hash_rate(), 0.0);

        engine.start_mining(2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = engine.status();
        assert!(status.pow_running);
        assert_eq!(status.pow_threads, 2);
        assert!(status.worker_states.iter().all(|s| *s == WorkerState::Hashing));
        assert!(engine.current_hash_rate() > 0.0);
        assert_eq!(engine.allocator().reserved_count(), 2);

        engine.stop_mining().await.unwrap();
        let status = engine.status();
        assert!(!status.pow_running);
        assert!(status.worker_states.is_empty());
        assert_eq!(engine.current_hash_rate(), 0.0);
        // Abandoned templates return their keys
        assert_eq!(engine.allocator().reserved_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_mining_replaces_running_set() {
        let (engine, _) = engine(hard_pow_config());
        engine.start_mining(3).await.unwrap();
        engine.start_mining(1).await.unwrap();
        assert_eq!(engine.status().pow_threads, 1);

        engine.start_mining(0).await.unwrap();
        assert!(!engine.status().pow_running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_starts_leave_one_set() {
        let (engine, _) = engine(hard_pow_config());

        let (a, b) = tokio::join!(engine.start_mining(2), engine.start_mining(3));
        a.unwrap();
        b.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Replaced workers have exited and returned their keys
        let status = engine.status();
        assert!(status.pow_threads == 2 || status.pow_threads == 3);
        assert_eq!(engine.allocator().reserved_count(), status.pow_threads);

        engine.stop_mining().await.unwrap();
        assert_eq!(engine.allocator().reserved_count(), 0);
    }

    #[tokio::test]
    async fn test_drivers_reject_double_start() {
        let (engine, _) = engine(MinerConfig::default());

        engine.start_staking().await.unwrap();
        assert!(matches!(
            engine.start_staking().await,
            Err(MiningError::AlreadyRunning(_))
        ));

        engine.start_authority_minting(30).await.unwrap();
        assert!(matches!(
            engine.start_authority_minting(30).await,
            Err(MiningError::AlreadyRunning(_))
        ));

        let status = engine.status();
        assert!(status.staking);
        assert_eq!(status.authority_period, Some(30));

        engine.shutdown().await.unwrap();
        let status = engine.status();
        assert!(!status.staking);
        assert_eq!(status.authority_period, None);

        // Restartable after stop
        engine.start_staking().await.unwrap();
        engine.stop_staking().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_authority_period_rejected() {
        let (engine, _) = engine(MinerConfig::default());
        assert!(matches!(
            engine.start_authority_minting(0).await,
            Err(MiningError::InvalidConfig(_))
        ));
        assert_eq!(engine.status().authority_period, None);
    }
}
