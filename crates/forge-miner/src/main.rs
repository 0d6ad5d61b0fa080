//! # Forge Miner - Development Node
//!
//! Runs the mining engine against an in-memory devnet: a genesis tip, a
//! seeded mempool, a wallet key pool, a stake wallet and an authority key.
//! Accepted blocks advance the in-memory chain.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (TOML file from argv[1] or `FORGE_CONFIG`, then env)
//! 2. Install logging
//! 3. Seed the devnet collaborators
//! 4. Start the modes enabled in configuration
//! 5. Report status until Ctrl+C, then stop every driver

use anyhow::{Context, Result};
use forge_miner::adapters::{
    AcceptAllValidator, FilePeriodMarker, InMemoryKeyPool, InMemoryMempool, InMemoryPeriodMarker,
    InMemoryStakeWallet, InMemorySubmitter, StaticAuthorityKeys, WatchedChainState,
};
use forge_miner::domain::authority::signing_key_from_bytes;
use forge_miner::domain::{OutPoint, Transaction, TxIn, TxOut, COIN};
use forge_miner::utils::hashing::hash256;
use forge_miner::utils::time::unix_now;
use forge_miner::{
    ChainStateReader, ChainTip, Collaborators, MinerConfig, MiningControl, MiningEngine,
    PeriodMarkerStore, PoolEntry, StakeableOutput,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Demo transactions placed in the devnet mempool
const DEVNET_POOL_SIZE: u8 = 32;

/// Seconds between status reports
const STATUS_INTERVAL_SECS: u64 = 30;

fn load_config() -> Result<MinerConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FORGE_CONFIG").ok());

    let mut config = match path {
        Some(path) => MinerConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => MinerConfig::default(),
    };
    config.apply_env_overrides();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn devnet_pool() -> Vec<PoolEntry> {
    (0..DEVNET_POOL_SIZE)
        .map(|i| {
            let tx = Transaction {
                version: 1,
                inputs: vec![TxIn {
                    prevout: OutPoint::new(hash256(&[0xD0, i]), 0),
                    script_sig: vec![i; 72],
                }],
                outputs: vec![TxOut {
                    value: 10 * COIN,
                    script_pubkey: vec![0x76, 0xA9, i],
                }],
                lock_time: 0,
            };
            PoolEntry {
                tx,
                fee: 1_000 + u64::from(i) * 250,
                op_cost: 1 + u64::from(i % 4),
                coin_age: u128::from(i) * 1_000_000,
            }
        })
        .collect()
}

fn devnet_stake(now: u64) -> Vec<StakeableOutput> {
    (0..4u8)
        .map(|i| StakeableOutput {
            outpoint: OutPoint::new(hash256(&[0x5E, i]), u32::from(i)),
            value: 1_000 * COIN,
            script_pubkey: vec![0x51, i],
            confirmed_at: now.saturating_sub(7 * 86_400),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    init_logging(&config.log_level)?;

    info!("===========================================");
    info!("  Forge Miner devnet v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let now = unix_now();
    let genesis = ChainTip::genesis(
        hash256(b"forge devnet genesis"),
        now.saturating_sub(60),
        config.pow_difficulty.initial_target,
    );
    let chain = Arc::new(WatchedChainState::new(Some(genesis)));
    let mempool = Arc::new(InMemoryMempool::with_entries(devnet_pool()));

    let stake_key = signing_key_from_bytes(&hash256(b"forge devnet stake key").0)?;
    let stake_wallet = Arc::new(InMemoryStakeWallet::new(stake_key, devnet_stake(now)));

    let authority_keys = match &config.poa.authority_key {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key).context("poa.authority_key is not hex")?;
            StaticAuthorityKeys::always(signing_key_from_bytes(&bytes)?)
        }
        None if config.poa.enabled => {
            warn!("[forge] no authority key configured, using the devnet key");
            StaticAuthorityKeys::always(signing_key_from_bytes(
                &hash256(b"forge devnet authority key").0,
            )?)
        }
        None => StaticAuthorityKeys::none(),
    };

    let period_marker: Arc<dyn PeriodMarkerStore> = match &config.poa.marker_path {
        Some(path) => Arc::new(FilePeriodMarker::new(path)),
        None => Arc::new(InMemoryPeriodMarker::default()),
    };

    let submitter = InMemorySubmitter::attached(chain.clone())
        .with_mempool(mempool.clone())
        .with_stake_wallet(stake_wallet.clone());

    let engine = MiningEngine::new(
        config.clone(),
        Collaborators {
            chain: chain.clone(),
            mempool,
            validator: Arc::new(AcceptAllValidator),
            key_pool: Arc::new(InMemoryKeyPool::with_generated(10_000)),
            stake_wallet,
            authority_keys: Arc::new(authority_keys),
            period_marker,
            submitter: Arc::new(submitter),
        },
    )?;

    if config.pow.enabled {
        engine.start_mining(config.pow.threads).await?;
    }
    if config.pos.enabled {
        engine.start_staking().await?;
    }
    if config.poa.enabled {
        engine.start_authority_minting(config.poa.period_secs).await?;
    }
    if !(config.pow.enabled || config.pos.enabled || config.poa.enabled) {
        warn!("[forge] no mining mode enabled; set pow/pos/poa.enabled in the config");
    }

    info!("Miner is running. Press Ctrl+C to stop.");
    let mut status_tick = tokio::time::interval(Duration::from_secs(STATUS_INTERVAL_SECS));
    status_tick.tick().await;
    loop {
        tokio::select! {
            _ = status_tick.tick() => {
                let status = engine.status();
                let height = chain.tip().map(|t| t.height).unwrap_or_default();
                info!(
                    height,
                    hash_rate = format!("{:.0}", status.hash_rate),
                    pow = status.blocks_found_pow,
                    pos = status.blocks_found_pos,
                    poa = status.blocks_found_poa,
                    rejected = status.submissions_rejected,
                    "[forge] status"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    engine.shutdown().await?;
    Ok(())
}
