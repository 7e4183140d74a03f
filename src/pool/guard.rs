//! Admission guard: a `max_connections` ceiling above the pool.
//!
//! Borrowers beyond the ceiling wait in FIFO order. A released handle goes
//! straight to the first waiter instead of back through the pool.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{Lease, Manager, Pool, PoolError};

struct GateState<M: Manager> {
    in_use: usize,
    waiters: VecDeque<oneshot::Sender<Guarded<M>>>,
}

struct Gate<M: Manager> {
    max_connections: usize,
    state: Mutex<GateState<M>>,
}

impl<M: Manager> Gate<M> {
    /// Pass an admission (and the lease, when there is one) to the next live waiter,
    /// or give the admission up.
    fn hand_off(gate: &Arc<Self>, mut lease: Option<Lease<M>>) {
        let mut state = gate.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            let ticket = Guarded {
                lease,
                gate: Arc::clone(gate),
                armed: true,
            };
            match waiter.send(ticket) {
                Ok(()) => return,
                Err(mut returned) => {
                    returned.armed = false;
                    lease = returned.lease.take();
                }
            }
        }
        state.in_use = state.in_use.saturating_sub(1);
        drop(state);
        drop(lease);
    }
}

/// Bounds concurrent borrowers of a [`Pool`] independently of its sizing.
pub struct AdmissionGuard<M: Manager> {
    pool: Pool<M>,
    gate: Arc<Gate<M>>,
}

impl<M: Manager> Clone for AdmissionGuard<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<M: Manager> std::fmt::Debug for AdmissionGuard<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("max_connections", &self.gate.max_connections)
            .field("in_use", &self.in_use())
            .finish_non_exhaustive()
    }
}

impl<M: Manager> AdmissionGuard<M> {
    /// Wrap `pool` with a ceiling of `max_connections` concurrent borrowers (minimum 1).
    pub fn new(pool: Pool<M>, max_connections: usize) -> Self {
        Self {
            pool,
            gate: Arc::new(Gate {
                max_connections: max_connections.max(1),
                state: Mutex::new(GateState {
                    in_use: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    /// Borrowers currently admitted.
    pub fn in_use(&self) -> usize {
        self.gate.state.lock().in_use
    }

    /// Borrowers queued behind the ceiling.
    pub fn waiting(&self) -> usize {
        self.gate.state.lock().waiters.len()
    }

    /// Borrow a handle, queueing behind the ceiling when it is reached.
    pub async fn acquire(&self) -> Result<Guarded<M>, PoolError> {
        let queued = {
            let mut state = self.gate.state.lock();
            if state.in_use < self.gate.max_connections {
                state.in_use += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        let mut ticket = match queued {
            None => Guarded {
                lease: None,
                gate: Arc::clone(&self.gate),
                armed: true,
            },
            Some(rx) => rx.await.map_err(|_| PoolError::NotOpen)?,
        };

        if ticket.lease.is_none() {
            ticket.lease = Some(self.pool.acquire().await?);
        }
        Ok(ticket)
    }
}

/// A lease admitted through an [`AdmissionGuard`].
pub struct Guarded<M: Manager> {
    lease: Option<Lease<M>>,
    gate: Arc<Gate<M>>,
    armed: bool,
}

impl<M: Manager> Guarded<M> {
    /// Destroy the handle; the admission passes on to the next waiter.
    pub fn invalidate(mut self) {
        if let Some(lease) = self.lease.take() {
            lease.invalidate();
        }
    }
}

impl<M: Manager> Deref for Guarded<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        match &self.lease {
            Some(lease) => &**lease,
            None => unreachable!("guarded lease accessed before admission"),
        }
    }
}

impl<M: Manager> DerefMut for Guarded<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.lease {
            Some(lease) => &mut **lease,
            None => unreachable!("guarded lease accessed before admission"),
        }
    }
}

impl<M: Manager> Drop for Guarded<M> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            Gate::hand_off(&self.gate, self.lease.take());
        }
    }
}
