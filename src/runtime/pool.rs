// src/runtime/pool.rs
//! Bounded runtime pool
//!
//! Owns a bounded set of interpreter runtimes and multiplexes request
//! handlers across them. Each runtime serves exactly one owner at a time;
//! the pool serializes checkout and return, queues contended acquires in
//! FIFO order, destroys broken runtimes, evicts cold idle runtimes, and
//! drains gracefully on shutdown.
//!
//! # Architecture
//!
//! ```text
//! RuntimePool
//! ├─ Idle:    [R1, R2, ...]   (warm, most recently returned last)
//! ├─ InUse:   leased out as PooledRuntime guards
//! ├─ Waiters: [W1, W2, ...]   (blocked acquires, arrival order)
//! └─ Broken:  destroyed asynchronously, replaced when under min_size
//! ```
//!
//! All state transitions happen under a single mutex. The lock is never
//! held across factory calls or while a caller is blocked: waiting is a
//! oneshot rendezvous handed the runtime directly by the releasing caller.

use crate::runtime::factory::RuntimeFactory;
use crate::runtime::interpreter::{InterpreterRuntime, RuntimeId, RuntimeRequest, RuntimeResponse};
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pool sizing and timing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Runtimes created eagerly at start and preserved by eviction
    pub min_size: usize,

    /// Hard cap on live runtimes (idle + in-use + under construction)
    pub max_size: usize,

    /// Default acquire budget when callers do not bring their own
    pub acquire_timeout: Duration,

    /// Idle age beyond which a runtime becomes eligible for eviction
    pub idle_eviction_age: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 8,
            acquire_timeout: Duration::from_secs(30),
            idle_eviction_age: Duration::from_secs(300),
        }
    }
}

/// How a lease ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The runtime is healthy and may serve the next request
    Ok,
    /// The runtime is corrupted; destroy it, never re-pool it
    Failed,
}

/// What a lease owns while checked out
struct LeaseInner {
    id: RuntimeId,
    runtime: Box<dyn InterpreterRuntime>,
    created_at: Instant,
    /// Pool generation at checkout; a mismatch at return time means the
    /// pool shut down in between and the runtime must be destroyed.
    generation: u64,
}

/// An idle runtime parked in the pool
struct IdleEntry {
    id: RuntimeId,
    runtime: Box<dyn InterpreterRuntime>,
    created_at: Instant,
    last_used_at: Instant,
}

/// A blocked acquire, woken exactly once
struct Waiter {
    id: u64,
    tx: oneshot::Sender<RuntimeHandoff>,
}

/// A runtime in flight to a waiter.
///
/// The sending release transfers ownership through the oneshot without
/// touching the in-use count. A waiter whose task dies after the send
/// drops the channel with the runtime still inside; the Drop impl hands
/// the runtime back through the normal return path so the pool never
/// loses a capacity slot to an abandoned wait.
struct RuntimeHandoff {
    inner: Option<LeaseInner>,
    pool: Weak<RuntimePool>,
}

impl RuntimeHandoff {
    fn new(pool: Weak<RuntimePool>, inner: LeaseInner) -> Self {
        Self {
            inner: Some(inner),
            pool,
        }
    }

    /// Take the runtime out of the guard, disarming its Drop. Safe to
    /// call while holding the pool lock.
    fn claim(mut self) -> LeaseInner {
        self.inner.take().expect("BUG: hand-off claimed twice")
    }
}

impl Drop for RuntimeHandoff {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else { return };
        if let Some(pool) = self.pool.upgrade() {
            warn!(
                "waiter vanished after being handed runtime {}; returning it to the pool",
                inner.id
            );
            pool.finish(inner, ReleaseOutcome::Ok);
        }
    }
}

struct PoolState {
    /// Ordered by last use: front is coldest, back is warmest
    idle: Vec<IdleEntry>,
    /// Blocked acquires in arrival order
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    in_use: usize,
    /// Reserved construction slots (count toward capacity)
    creating: usize,
    /// Broken runtimes whose async destruction has not finished yet
    broken: usize,
    generation: u64,
    shutting_down: bool,
}

impl PoolState {
    /// Runtimes counting against `max_size`
    fn live(&self) -> usize {
        self.idle.len() + self.in_use + self.creating
    }
}

/// Snapshot of pool occupancy for the health/metrics surface
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub creating: usize,
    pub broken: usize,
    pub waiters: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl PoolStats {
    pub fn live(&self) -> usize {
        self.idle + self.in_use + self.creating
    }
}

enum AcquirePlan {
    Ready(LeaseInner),
    Create,
    Wait(u64, oneshot::Receiver<RuntimeHandoff>),
}

/// Bounded pool of single-owner interpreter runtimes
pub struct RuntimePool {
    config: PoolConfig,
    factory: Arc<dyn RuntimeFactory>,
    state: Mutex<PoolState>,
    /// Mirrors `in_use` so shutdown can await the drain without polling
    in_use_tx: watch::Sender<usize>,
    me: Weak<RuntimePool>,
}

impl RuntimePool {
    /// Create a pool and eagerly construct `min_size` runtimes.
    /// A construction failure at start is fatal.
    pub async fn new(config: PoolConfig, factory: Arc<dyn RuntimeFactory>) -> Result<Arc<Self>> {
        let (in_use_tx, _) = watch::channel(0usize);
        let pool = Arc::new_cyclic(|me| Self {
            config,
            factory,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                in_use: 0,
                creating: 0,
                broken: 0,
                generation: 0,
                shutting_down: false,
            }),
            in_use_tx,
            me: me.clone(),
        });

        pool.prewarm().await?;
        Ok(pool)
    }

    async fn prewarm(&self) -> Result<()> {
        let target = self.config.min_size.min(self.config.max_size);
        for _ in 0..target {
            let runtime = match self.factory.create().await {
                Ok(runtime) => runtime,
                Err(e) => {
                    // Tear down the partial warm set before surfacing the
                    // start-up failure.
                    let built = std::mem::take(&mut self.state.lock().idle);
                    for entry in built {
                        self.factory.destroy(entry.runtime).await;
                    }
                    return Err(e);
                }
            };
            let now = Instant::now();
            let mut state = self.state.lock();
            state.idle.push(IdleEntry {
                id: RuntimeId::new(),
                runtime,
                created_at: now,
                last_used_at: now,
            });
        }
        info!(
            "runtime pool started with {target} warm runtimes (max {})",
            self.config.max_size
        );
        Ok(())
    }

    /// Check a runtime out of the pool.
    ///
    /// Prefers the most recently returned idle runtime. At capacity the
    /// caller queues FIFO behind earlier contended acquires; a zero
    /// `timeout` never blocks. Fails with `AcquireTimeout`,
    /// `PoolShuttingDown`, or `Construction` when a fresh build fails —
    /// the reserved slot is freed so a later acquire can retry.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledRuntime> {
        let pool = self.me.upgrade().ok_or(EngineError::PoolShuttingDown)?;

        let plan = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return Err(EngineError::PoolShuttingDown);
            }

            if let Some(entry) = state.idle.pop() {
                state.in_use += 1;
                let _ = self.in_use_tx.send_replace(state.in_use);
                AcquirePlan::Ready(LeaseInner {
                    id: entry.id,
                    runtime: entry.runtime,
                    created_at: entry.created_at,
                    generation: state.generation,
                })
            } else if self.config.max_size == 0 {
                return Err(EngineError::AcquireTimeout(timeout));
            } else if state.live() < self.config.max_size {
                state.creating += 1;
                AcquirePlan::Create
            } else if timeout.is_zero() {
                return Err(EngineError::AcquireTimeout(timeout));
            } else {
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, tx });
                AcquirePlan::Wait(id, rx)
            }
        };

        match plan {
            AcquirePlan::Ready(inner) => {
                debug!("acquired warm runtime {}", inner.id);
                Ok(PooledRuntime::new(pool, inner))
            }
            AcquirePlan::Create => self.create_for_caller(pool).await,
            AcquirePlan::Wait(waiter_id, rx) => self.wait_for_handoff(pool, waiter_id, rx, timeout).await,
        }
    }

    /// [`acquire`](Self::acquire) with the pool's configured default budget
    pub async fn acquire_default(&self) -> Result<PooledRuntime> {
        self.acquire(self.config.acquire_timeout).await
    }

    /// Build a fresh runtime for the calling acquire. The construction
    /// slot was already reserved under the lock.
    async fn create_for_caller(&self, pool: Arc<RuntimePool>) -> Result<PooledRuntime> {
        match self.factory.create().await {
            Ok(runtime) => {
                let id = RuntimeId::new();
                let now = Instant::now();
                let mut state = self.state.lock();
                state.creating -= 1;
                if state.shutting_down {
                    drop(state);
                    self.spawn_destroy(runtime);
                    return Err(EngineError::PoolShuttingDown);
                }
                state.in_use += 1;
                let _ = self.in_use_tx.send_replace(state.in_use);
                let generation = state.generation;
                drop(state);

                debug!("constructed runtime {id} on demand");
                Ok(PooledRuntime::new(
                    pool,
                    LeaseInner {
                        id,
                        runtime,
                        created_at: now,
                        generation,
                    },
                ))
            }
            Err(e) => {
                // Free the slot so another acquire can retry construction.
                self.state.lock().creating -= 1;
                warn!("runtime construction failed: {e}");
                Err(e)
            }
        }
    }

    /// Block on the wait queue until a release hands us a runtime, the
    /// timeout elapses, or shutdown wakes everyone.
    async fn wait_for_handoff(
        &self,
        pool: Arc<RuntimePool>,
        waiter_id: u64,
        mut rx: oneshot::Receiver<RuntimeHandoff>,
        timeout: Duration,
    ) -> Result<PooledRuntime> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(handoff)) => {
                let inner = handoff.claim();
                debug!("waiter handed runtime {}", inner.id);
                Ok(PooledRuntime::new(pool, inner))
            }
            // Sender dropped without a hand-off: shutdown drained the queue.
            Ok(Err(_)) => Err(EngineError::PoolShuttingDown),
            Err(_) => {
                let was_queued = {
                    let mut state = self.state.lock();
                    let before = state.waiters.len();
                    state.waiters.retain(|w| w.id != waiter_id);
                    state.waiters.len() != before
                };

                if !was_queued {
                    // A release popped our entry while the timeout fired.
                    // The hand-off wins: accept the runtime instead of
                    // stranding it.
                    if let Ok(handoff) = rx.try_recv() {
                        return Ok(PooledRuntime::new(pool, handoff.claim()));
                    }
                }

                if self.state.lock().shutting_down {
                    Err(EngineError::PoolShuttingDown)
                } else {
                    Err(EngineError::AcquireTimeout(timeout))
                }
            }
        }
    }

    /// Return a runtime. Called exactly once per lease by `PooledRuntime`.
    fn finish(&self, inner: LeaseInner, outcome: ReleaseOutcome) {
        let mut state = self.state.lock();

        // A lease from before shutdown never re-enters the pool.
        if state.shutting_down || inner.generation != state.generation {
            state.in_use = state.in_use.saturating_sub(1);
            let _ = self.in_use_tx.send_replace(state.in_use);
            drop(state);
            debug!("destroying runtime {} returned during shutdown", inner.id);
            self.spawn_destroy(inner.runtime);
            return;
        }

        match outcome {
            ReleaseOutcome::Ok => {
                let mut inner = inner;
                // Hand directly to the oldest waiter, bypassing the idle
                // stack; ownership transfers without leaving InUse.
                while let Some(waiter) = state.waiters.pop_front() {
                    match waiter.tx.send(RuntimeHandoff::new(self.me.clone(), inner)) {
                        Ok(()) => return,
                        // Waiter gave up between queueing and now; claim
                        // under the lock so the guard never re-enters it.
                        Err(returned) => inner = returned.claim(),
                    }
                }
                state.in_use -= 1;
                let _ = self.in_use_tx.send_replace(state.in_use);
                state.idle.push(IdleEntry {
                    id: inner.id,
                    runtime: inner.runtime,
                    created_at: inner.created_at,
                    last_used_at: Instant::now(),
                });
            }
            ReleaseOutcome::Failed => {
                state.in_use -= 1;
                let _ = self.in_use_tx.send_replace(state.in_use);
                state.broken += 1;

                // Replace when dropping under min_size, and also when
                // callers are queued: a waiter must not starve while
                // capacity sits free with no new acquire arriving.
                let replace = (state.live() < self.config.min_size
                    || !state.waiters.is_empty())
                    && state.live() < self.config.max_size;
                if replace {
                    state.creating += 1;
                }
                drop(state);

                warn!("runtime {} returned broken; destroying", inner.id);
                self.spawn_destroy_broken(inner.runtime);
                if replace {
                    self.spawn_replacement();
                }
            }
        }
    }

    fn spawn_destroy(&self, runtime: Box<dyn InterpreterRuntime>) {
        let factory = Arc::clone(&self.factory);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    factory.destroy(runtime).await;
                });
            }
            Err(_) => {
                warn!("no async context at destroy time; dropping runtime without teardown");
            }
        }
    }

    fn spawn_destroy_broken(&self, runtime: Box<dyn InterpreterRuntime>) {
        let factory = Arc::clone(&self.factory);
        let me = self.me.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    factory.destroy(runtime).await;
                    if let Some(pool) = me.upgrade() {
                        pool.state.lock().broken -= 1;
                    }
                });
            }
            Err(_) => {
                self.state.lock().broken -= 1;
                warn!("no async context at destroy time; dropping runtime without teardown");
            }
        }
    }

    /// Construct a replacement in the background, preferring a queued
    /// waiter over idle placement. The slot is already reserved.
    fn spawn_replacement(&self) {
        let me = self.me.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.state.lock().creating -= 1;
            return;
        };
        handle.spawn(async move {
            let Some(pool) = me.upgrade() else { return };
            match pool.factory.create().await {
                Ok(runtime) => pool.install_replacement(runtime),
                Err(e) => {
                    pool.state.lock().creating -= 1;
                    warn!("replacement runtime construction failed: {e}");
                }
            }
        });
    }

    fn install_replacement(&self, runtime: Box<dyn InterpreterRuntime>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.creating -= 1;

        if state.shutting_down {
            drop(state);
            self.spawn_destroy(runtime);
            return;
        }

        let mut inner = LeaseInner {
            id: RuntimeId::new(),
            runtime,
            created_at: now,
            generation: state.generation,
        };
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(RuntimeHandoff::new(self.me.clone(), inner)) {
                Ok(()) => {
                    state.in_use += 1;
                    let _ = self.in_use_tx.send_replace(state.in_use);
                    return;
                }
                Err(returned) => inner = returned.claim(),
            }
        }
        state.idle.push(IdleEntry {
            id: inner.id,
            runtime: inner.runtime,
            created_at: inner.created_at,
            last_used_at: now,
        });
    }

    /// Destroy idle runtimes older than `idle_eviction_age`, coldest
    /// first, never taking the live count below `min_size`. Returns how
    /// many runtimes were evicted.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return 0;
            }
            while state.live() > self.config.min_size {
                let Some(coldest) = state.idle.first() else { break };
                if now.duration_since(coldest.last_used_at) < self.config.idle_eviction_age {
                    break;
                }
                evicted.push(state.idle.remove(0));
            }
        }

        let count = evicted.len();
        for entry in evicted {
            debug!("evicting idle runtime {}", entry.id);
            self.spawn_destroy(entry.runtime);
        }
        count
    }

    /// Periodic sweep: idle eviction plus metrics publication.
    pub fn start_maintenance(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if self.state.lock().shutting_down {
                    break;
                }
                let evicted = self.evict_idle();
                if evicted > 0 {
                    debug!("idle sweep evicted {evicted} runtimes");
                }
                crate::observability::record_pool_stats(&self.stats());
            }
        })
    }

    /// Stop admitting acquires, wake every queued waiter with
    /// `PoolShuttingDown`, destroy idle runtimes, then wait up to
    /// `drain_timeout` for leased runtimes to come back. Terminal: the
    /// pool cannot be reused afterward.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        let (waiters, idle) = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.generation += 1;
            (
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.idle),
            )
        };

        info!(
            "pool shutting down: waking {} waiters, destroying {} idle runtimes",
            waiters.len(),
            idle.len()
        );
        // Dropping the senders wakes every blocked acquire.
        drop(waiters);

        for entry in idle {
            self.factory.destroy(entry.runtime).await;
        }

        let mut rx = self.in_use_tx.subscribe();
        let drained = tokio::time::timeout(drain_timeout, rx.wait_for(|&n| n == 0))
            .await
            .is_ok();
        if drained {
            info!("pool drained cleanly");
        } else {
            let still = self.state.lock().in_use;
            warn!("drain timeout elapsed with {still} runtimes still leased; forcing termination");
        }
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Occupancy snapshot for health checks and metrics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use,
            creating: state.creating,
            broken: state.broken,
            waiters: state.waiters.len(),
            min_size: self.config.min_size,
            max_size: self.config.max_size,
        }
    }
}

/// A checked-out runtime
///
/// The lease is the only path back to availability: either call
/// [`release`](Self::release) with the execution outcome, or let the guard
/// drop — a drop without an explicit release is treated as a failure so a
/// panicking caller can never leak a runtime or re-pool a suspect one.
pub struct PooledRuntime {
    inner: Option<LeaseInner>,
    pool: Arc<RuntimePool>,
}

impl PooledRuntime {
    fn new(pool: Arc<RuntimePool>, inner: LeaseInner) -> Self {
        Self {
            inner: Some(inner),
            pool,
        }
    }

    /// Pool-assigned identity of the leased runtime
    pub fn id(&self) -> RuntimeId {
        self.inner
            .as_ref()
            .expect("BUG: lease used after release")
            .id
    }

    /// Time since the leased runtime was constructed
    pub fn age(&self) -> Duration {
        self.inner
            .as_ref()
            .expect("BUG: lease used after release")
            .created_at
            .elapsed()
    }

    /// Serve one request on the leased runtime
    pub async fn execute(&mut self, request: RuntimeRequest) -> Result<RuntimeResponse> {
        let inner = self.inner.as_mut().expect("BUG: lease used after release");
        inner.runtime.execute(request).await
    }

    /// Return the runtime with the given outcome, consuming the lease
    pub fn release(mut self, outcome: ReleaseOutcome) {
        if let Some(inner) = self.inner.take() {
            self.pool.finish(inner, outcome);
        }
    }
}

impl std::fmt::Debug for PooledRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledRuntime")
            .field("id", &self.inner.as_ref().map(|inner| inner.id))
            .finish()
    }
}

impl Drop for PooledRuntime {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            warn!(
                "runtime {} lease dropped without explicit release; treating as failed",
                inner.id
            );
            self.pool.finish(inner, ReleaseOutcome::Failed);
        }
    }
}
