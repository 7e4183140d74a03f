//! Pool core: borrow/return, validation and eviction.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Manager, PoolConfig, PoolError, WhenExhausted};

// =============================================================================
// Slot
// =============================================================================

/// A pooled handle together with its bookkeeping timestamps.
pub struct Slot<R> {
    resource: R,
    pooled_at: Option<Instant>,
    borrowed_at: Option<Instant>,
}

impl<R> Slot<R> {
    pub(crate) fn new(resource: R) -> Self {
        Self {
            resource,
            pooled_at: None,
            borrowed_at: None,
        }
    }

    /// When the handle last went back to the idle list.
    pub fn pooled_at(&self) -> Option<Instant> {
        self.pooled_at
    }

    /// When the handle was last handed to a borrower.
    pub fn borrowed_at(&self) -> Option<Instant> {
        self.borrowed_at
    }
}

impl<R> std::fmt::Debug for Slot<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("pooled_at", &self.pooled_at)
            .field("borrowed_at", &self.borrowed_at)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Shared state
// =============================================================================

struct State<R> {
    idle: VecDeque<Slot<R>>,
    active: usize,
    open: bool,
}

enum Claim<R> {
    Idle(Slot<R>),
    Create,
    Wait,
}

struct Inner<M: Manager> {
    manager: M,
    config: PoolConfig,
    state: Mutex<State<M::Resource>>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Manager> Inner<M> {
    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Never pooled, no age limit, or pooled recently enough.
    fn is_valid(&self, slot: &Slot<M::Resource>) -> bool {
        match (slot.pooled_at, self.config.max_age) {
            (None, _) | (_, None) => true,
            (Some(pooled_at), Some(max_age)) => pooled_at.elapsed() < max_age,
        }
    }

    fn claim(&self) -> Result<Claim<M::Resource>, PoolError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(PoolError::NotOpen);
        }
        if state.active >= self.config.max_active {
            match self.config.when_exhausted {
                WhenExhausted::Fail => return Err(PoolError::Exhausted),
                WhenExhausted::Block => return Ok(Claim::Wait),
                WhenExhausted::Grow => {}
            }
        }
        state.active += 1;
        Ok(match state.idle.pop_back() {
            Some(slot) => Claim::Idle(slot),
            None => Claim::Create,
        })
    }

    fn release_reservation(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }

    fn destroy(&self, slot: Slot<M::Resource>) {
        self.manager.destroy(slot.resource);
    }

    /// Activate and validate an idle handle, destroying it on failure.
    async fn revive(&self, mut slot: Slot<M::Resource>) -> Option<Slot<M::Resource>> {
        if !self.is_valid(&slot) {
            tracing::debug!("Idle handle exceeded max_age, destroying");
            self.destroy(slot);
            return None;
        }
        if let Err(e) = self.manager.activate(&mut slot.resource).await {
            tracing::warn!(error = %e, "Idle handle activation failed, destroying");
            self.destroy(slot);
            return None;
        }
        if !self.manager.validate(&mut slot.resource).await {
            tracing::debug!("Idle handle failed validation, destroying");
            self.destroy(slot);
            return None;
        }
        Some(slot)
    }

    /// Create, activate and validate a fresh handle with retries.
    async fn create_valid(&self) -> Result<Slot<M::Resource>, PoolError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_interval).await;
            }

            match self.manager.create().await {
                Ok(resource) => {
                    let mut slot = Slot::new(resource);
                    let failure = match self.manager.activate(&mut slot.resource).await {
                        Ok(()) => {
                            if self.manager.validate(&mut slot.resource).await {
                                None
                            } else {
                                Some("validation failed".to_string())
                            }
                        }
                        Err(e) => Some(e.to_string()),
                    };
                    match failure {
                        None => return Ok(slot),
                        Some(reason) => {
                            self.destroy(slot);
                            last_error = reason;
                        }
                    }
                }
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                error = %last_error,
                "Pooled handle creation failed"
            );
        }

        Err(PoolError::Invalid(last_error))
    }

    fn give_back(&self, slot: Option<Slot<M::Resource>>) -> Result<(), PoolError> {
        let Some(mut slot) = slot else {
            tracing::error!("Null handle returned to pool");
            return Err(PoolError::NullReturned);
        };

        let rejected = {
            let mut state = self.state.lock();
            if state.active == 0 {
                drop(state);
                tracing::error!("More handles returned than were borrowed");
                self.destroy(slot);
                return Err(PoolError::TooManyReturned);
            }
            state.active -= 1;

            self.manager.passivate(&mut slot.resource);
            slot.pooled_at = Some(Instant::now());
            slot.borrowed_at = None;

            if state.open && state.idle.len() < self.config.max_idle {
                state.idle.push_back(slot);
                None
            } else {
                Some(slot)
            }
        };

        if let Some(slot) = rejected {
            self.destroy(slot);
        }
        Ok(())
    }

    async fn evict(&self) {
        let batch: Vec<_> = {
            let mut state = self.state.lock();
            let n = self.config.eviction_run_length.min(state.idle.len());
            state.idle.drain(..n).collect()
        };

        let mut evicted = 0usize;
        for slot in batch {
            let rejected = if self.is_valid(&slot) {
                let mut state = self.state.lock();
                if state.open && state.idle.len() < self.config.max_idle {
                    state.idle.push_back(slot);
                    None
                } else {
                    Some(slot)
                }
            } else {
                Some(slot)
            };
            if let Some(slot) = rejected {
                self.destroy(slot);
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle handles");
        }

        self.fill_min_idle().await;
    }

    async fn fill_min_idle(&self) {
        loop {
            let missing = {
                let state = self.state.lock();
                state.open && state.idle.len() < self.config.min_idle
            };
            if !missing {
                break;
            }

            match self.manager.create().await {
                Ok(resource) => {
                    let mut slot = Slot::new(resource);
                    slot.pooled_at = Some(Instant::now());
                    let rejected = {
                        let mut state = self.state.lock();
                        if state.open && state.idle.len() < self.config.max_idle {
                            state.idle.push_back(slot);
                            None
                        } else {
                            Some(slot)
                        }
                    };
                    if let Some(slot) = rejected {
                        self.destroy(slot);
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to top up idle handles");
                    break;
                }
            }
        }
    }
}

/// Releases an `active` reservation unless the borrow completed.
struct Reservation<'a, M: Manager> {
    inner: &'a Inner<M>,
    armed: bool,
}

impl<'a, M: Manager> Reservation<'a, M> {
    fn new(inner: &'a Inner<M>) -> Self {
        Self { inner, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<M: Manager> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_reservation();
        }
    }
}

// =============================================================================
// Eviction runner
// =============================================================================

enum Runner<M: Manager> {
    Strong(Arc<Inner<M>>),
    Weak(Weak<Inner<M>>),
}

impl<M: Manager> Runner<M> {
    fn get(&self) -> Option<Arc<Inner<M>>> {
        match self {
            Self::Strong(inner) => Some(Arc::clone(inner)),
            Self::Weak(inner) => inner.upgrade(),
        }
    }
}

fn spawn_evictor<M: Manager>(inner: &Arc<Inner<M>>) -> Option<JoinHandle<()>> {
    let period = inner.config.eviction_run_interval?;
    let runner = if inner.config.unref_eviction_runner {
        Runner::Weak(Arc::downgrade(inner))
    } else {
        Runner::Strong(Arc::clone(inner))
    };

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = runner.get() else {
                break;
            };
            if !inner.is_open() {
                break;
            }
            inner.evict().await;
        }
    }))
}

// =============================================================================
// Pool
// =============================================================================

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub active: usize,
    pub open: bool,
}

/// Generic pool of handles produced by a [`Manager`].
///
/// Cloning is cheap and yields another reference to the same pool.
pub struct Pool<M: Manager> {
    inner: Arc<Inner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Manager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<M: Manager> Pool<M> {
    /// Create a pool. Starts the eviction runner when `eviction_run_interval` is set,
    /// which requires a running tokio runtime.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        let inner = Arc::new(Inner {
            manager,
            config,
            state: Mutex::new(State {
                idle: VecDeque::new(),
                active: 0,
                open: true,
            }),
            evictor: Mutex::new(None),
        });

        let evictor = spawn_evictor(&inner);
        *inner.evictor.lock() = evictor;

        Self { inner }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a handle.
    ///
    /// # Errors
    /// `NotOpen` after close, `Exhausted` / `MaxWait` per the exhaustion policy,
    /// `Invalid` when no valid handle could be created within `max_retries`.
    pub async fn acquire(&self) -> Result<Lease<M>, PoolError> {
        let started = Instant::now();

        loop {
            let idle = match self.inner.claim()? {
                Claim::Wait => {
                    if started.elapsed() >= self.inner.config.max_wait {
                        return Err(PoolError::MaxWait);
                    }
                    tokio::time::sleep(self.inner.config.wait_interval).await;
                    continue;
                }
                Claim::Idle(slot) => Some(slot),
                Claim::Create => None,
            };

            let reservation = Reservation::new(&self.inner);
            let slot = match idle {
                Some(slot) => match self.inner.revive(slot).await {
                    Some(slot) => slot,
                    None => continue,
                },
                None => self.inner.create_valid().await?,
            };
            reservation.keep();

            let mut slot = slot;
            slot.borrowed_at = Some(Instant::now());
            return Ok(Lease {
                slot: Some(slot),
                pool: Arc::clone(&self.inner),
            });
        }
    }

    /// Return a detached slot.
    ///
    /// # Errors
    /// `NullReturned` when `slot` is `None`, `TooManyReturned` when nothing is borrowed.
    pub fn give_back(&self, slot: Option<Slot<M::Resource>>) -> Result<(), PoolError> {
        self.inner.give_back(slot)
    }

    /// Run one eviction sweep immediately.
    pub async fn run_eviction(&self) {
        self.inner.evict().await;
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            active: state.active,
            open: state.open,
        }
    }

    /// Close the pool and destroy every idle handle.
    ///
    /// Handles returned later are destroyed instead of pooled.
    ///
    /// # Errors
    /// `ClosedWithActive` if any handle is still borrowed.
    pub fn close(&self) -> Result<(), PoolError> {
        let (drained, active) = {
            let mut state = self.inner.state.lock();
            state.open = false;
            let drained: Vec<_> = state.idle.drain(..).collect();
            (drained, state.active)
        };

        if let Some(handle) = self.inner.evictor.lock().take() {
            handle.abort();
        }

        let destroyed = drained.len();
        for slot in drained {
            self.inner.destroy(slot);
        }
        tracing::debug!(destroyed, active, "Pool closed");

        if active > 0 {
            return Err(PoolError::ClosedWithActive(active));
        }
        Ok(())
    }
}

// =============================================================================
// Lease
// =============================================================================

/// Exclusive access to a pooled handle. Returns the handle on drop.
pub struct Lease<M: Manager> {
    slot: Option<Slot<M::Resource>>,
    pool: Arc<Inner<M>>,
}

impl<M: Manager> Lease<M> {
    /// When this handle was borrowed.
    pub fn borrowed_at(&self) -> Option<Instant> {
        self.slot.as_ref().and_then(|slot| slot.borrowed_at)
    }

    /// Return the handle now, surfacing pool misuse errors.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.pool.give_back(self.slot.take())
    }

    /// Destroy the handle instead of returning it.
    pub fn invalidate(mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.destroy(slot);
            self.pool.release_reservation();
        }
    }

    /// Take the slot out without returning it; pair with [`Pool::give_back`].
    pub fn detach(mut self) -> Option<Slot<M::Resource>> {
        self.slot.take()
    }
}

impl<M: Manager> Deref for Lease<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match &self.slot {
            Some(slot) => &slot.resource,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl<M: Manager> DerefMut for Lease<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.slot {
            Some(slot) => &mut slot.resource,
            None => unreachable!("lease accessed after release"),
        }
    }
}

impl<M: Manager> Drop for Lease<M> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let _ = self.pool.give_back(Some(slot));
        }
    }
}

impl<M: Manager> std::fmt::Debug for Lease<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}
