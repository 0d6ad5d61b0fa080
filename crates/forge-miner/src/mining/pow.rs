//! PoW hashing pool
//!
//! Each worker runs on its own OS thread and owns its template exclusively.
//! Workers share only the tip snapshot (read through the builder), the key
//! allocator and the hash-rate tracker. Worker `i` of `n` searches extra-nonce
//! partition `i`, so no two workers hash the same header.
//!
//! A worker checks for a stop request and a tip change once per batch of
//! `hash_batch` nonces; a stale template is dropped together with its nonce
//! progress and the reserve key goes back to the pool.

use super::hashrate::HashRateTracker;
use super::keys::build_with_reserved_key;
use super::submit::BlockHandoff;
use crate::config::PowConfig;
use crate::domain::{
    update_time, BlockTemplate, ConsensusMode, NonceRoller, TemplateBuilder, TimeUpdate,
};
use crate::error::{MiningError, Result};
use crate::ports::inbound::WorkerState;
use crate::utils::hashing::meets_target;
use crate::utils::time::unix_now;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Shared state handed to every PoW worker
pub struct PowContext {
    builder: Arc<TemplateBuilder>,
    handoff: BlockHandoff,
    tracker: Arc<HashRateTracker>,
    config: PowConfig,
    max_drift_secs: u64,
}

impl PowContext {
    /// Create new worker context
    pub fn new(
        builder: Arc<TemplateBuilder>,
        handoff: BlockHandoff,
        tracker: Arc<HashRateTracker>,
        config: PowConfig,
        max_drift_secs: u64,
    ) -> Self {
        Self {
            builder,
            handoff,
            tracker,
            config,
            max_drift_secs,
        }
    }
}

/// How a search over one template ended
#[derive(Debug, PartialEq, Eq)]
enum SearchOutcome {
    Found,
    Stale,
    Rebuild,
    Stopped,
}

struct PowWorker {
    id: usize,
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl PowWorker {
    fn spawn(id: usize, partitions: usize, ctx: Arc<PowContext>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));

        let running_clone = Arc::clone(&running);
        let state_clone = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name(format!("forge-pow-{}", id))
            .spawn(move || worker_loop(id, partitions, &ctx, &running_clone, &state_clone))
            .map_err(|e| MiningError::Internal(format!("failed to spawn PoW worker: {}", e)))?;

        debug!(worker_id = id, "PoW worker spawned");

        Ok(Self {
            id,
            running,
            state,
            handle: Some(handle),
        })
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker_id = self.id, "PoW worker panicked");
            }
        }
    }
}

impl Drop for PowWorker {
    fn drop(&mut self) {
        // Not joined here; `MinerThreadSet::shutdown` joins
        self.stop();
    }
}

/// The running set of PoW workers
pub struct MinerThreadSet {
    workers: Vec<PowWorker>,
}

impl MinerThreadSet {
    /// Spawn `threads` workers over disjoint extra-nonce partitions
    pub fn spawn(ctx: Arc<PowContext>, threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            // Already spawned workers are stopped by Drop on error
            workers.push(PowWorker::spawn(id, threads, Arc::clone(&ctx))?);
        }
        info!("[forge] started {} PoW worker(s)", threads);
        Ok(Self { workers })
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Check if the set has no workers
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// State of every worker, by worker id
    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(PowWorker::state).collect()
    }

    /// Request every worker to stop without waiting
    pub fn stop(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    /// Stop every worker and wait for it to exit
    pub fn shutdown(self) {
        self.stop();
        let count = self.workers.len();
        for worker in self.workers {
            worker.join();
        }
        info!("[forge] stopped {} PoW worker(s)", count);
    }
}

fn set_state(state: &AtomicU8, value: WorkerState) {
    state.store(value as u8, Ordering::Relaxed);
}

/// Sleep up to `delay`, waking early on a stop request
fn pause(running: &AtomicBool, delay: Duration) {
    let step = Duration::from_millis(10);
    let deadline = Instant::now() + delay;
    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));
    }
}

fn worker_loop(
    id: usize,
    partitions: usize,
    ctx: &PowContext,
    running: &AtomicBool,
    state: &AtomicU8,
) {
    let mut roller = NonceRoller::new(id, partitions, ctx.config.max_nonce);
    let mut keypool_warned = false;

    while running.load(Ordering::Relaxed) {
        set_state(state, WorkerState::Idle);

        let (mut template, key) = match build_with_reserved_key(
            &ctx.builder,
            ctx.handoff.allocator(),
            ConsensusMode::ProofOfWork,
        ) {
            Ok(built) => {
                keypool_warned = false;
                ctx.handoff.metrics().record_template(built.0.tx_count());
                built
            }
            Err(MiningError::RewardDestinationUnavailable) => {
                if !ctx.config.pause_on_empty_keypool {
                    ctx.handoff.metrics().record_key_pool_exhausted();
                    warn!(worker_id = id, "[forge] key pool exhausted, PoW worker exiting");
                    break;
                }
                if !keypool_warned {
                    ctx.handoff.metrics().record_key_pool_exhausted();
                    warn!(
                        worker_id = id,
                        "[forge] key pool exhausted, mining paused until refilled"
                    );
                    keypool_warned = true;
                }
                pause(running, ctx.config.retry_delay());
                continue;
            }
            Err(MiningError::NoValidTip) => {
                debug!(worker_id = id, "no valid tip, waiting");
                pause(running, ctx.config.retry_delay());
                continue;
            }
            Err(e) => {
                if matches!(e, MiningError::InvalidSelection(_)) {
                    error!(worker_id = id, "template build failed: {}", e);
                } else {
                    warn!(worker_id = id, "template build failed: {}", e);
                }
                pause(running, ctx.config.retry_delay());
                continue;
            }
        };

        set_state(state, WorkerState::Hashing);
        match search(id, ctx, &mut roller, &mut template, running) {
            Ok(SearchOutcome::Found) => {
                set_state(state, WorkerState::Found);
                info!(
                    worker_id = id,
                    height = template.header().height,
                    nonce = template.header().nonce,
                    extra_nonce = roller.extra_nonce(),
                    "found PoW solution"
                );
                // Rejection is logged and counted by the hand-off
                let _ = ctx
                    .handoff
                    .submit(template.into_block(), ConsensusMode::ProofOfWork, key);
            }
            Ok(SearchOutcome::Stale) => {
                ctx.handoff.metrics().record_stale_template();
                trace!(worker_id = id, "tip changed, abandoning template");
            }
            Ok(SearchOutcome::Rebuild) => {
                trace!(worker_id = id, "target changed with timestamp, rebuilding");
            }
            Ok(SearchOutcome::Stopped) => break,
            Err(e) => {
                error!(worker_id = id, "search aborted: {}", e);
                pause(running, ctx.config.retry_delay());
            }
        }
    }

    set_state(state, WorkerState::Stopped);
    debug!(worker_id = id, "PoW worker exiting");
}

/// Hash `template` until a solution, a tip change, a rebuild or a stop
fn search(
    id: usize,
    ctx: &PowContext,
    roller: &mut NonceRoller,
    template: &mut BlockTemplate,
    running: &AtomicBool,
) -> Result<SearchOutcome> {
    roller.prepare(template)?;
    let target = template.header().target;
    let time_update = ctx.config.time_update_interval();
    let mut last_time_update = Instant::now();

    loop {
        if !running.load(Ordering::Relaxed) {
            return Ok(SearchOutcome::Stopped);
        }

        let tip = match ctx.builder.tip() {
            Some(tip) if !template.is_stale(&tip) => tip,
            _ => return Ok(SearchOutcome::Stale),
        };

        if last_time_update.elapsed() >= time_update {
            last_time_update = Instant::now();
            let update = update_time(
                template,
                &tip,
                unix_now(),
                ctx.max_drift_secs,
                ctx.builder.rules(),
            );
            if update == TimeUpdate::NeedsRebuild {
                return Ok(SearchOutcome::Rebuild);
            }
        }

        let mut attempts = 0u64;
        for _ in 0..ctx.config.hash_batch {
            if roller.next_nonce(template).is_none() {
                let extra = roller.roll_extra_nonce(template)?;
                trace!(worker_id = id, extra_nonce = extra, "nonce range exhausted");
                continue;
            }
            attempts += 1;
            if meets_target(&template.header().hash(), target) {
                ctx.tracker.record(attempts);
                return Ok(SearchOutcome::Found);
            }
        }
        ctx.tracker.record(attempts);
    }
}
