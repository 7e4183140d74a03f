//! Generic resource pool.
//!
//! Manages opaque handles (database connections in practice) through a
//! borrow/return lifecycle with validation, retried creation and periodic
//! eviction.
//!
//! # Components
//!
//! - [`Pool`] / [`Lease`]: the pool itself and an exclusive borrowed handle
//! - [`Manager`]: create/activate/validate/passivate/destroy hooks for a resource type
//! - [`AdmissionGuard`]: an outer `max_connections` ceiling with a FIFO waiter queue
//! - [`SerialQueue`]: strict one-at-a-time execution for backends without concurrency
//! - [`PoolConfig`] / [`WhenExhausted`]: sizing and exhaustion policy

mod config;
mod error;
mod generic;
mod guard;
mod manager;
mod queue;

pub use config::{PoolConfig, WhenExhausted};
pub use error::PoolError;
pub use generic::{Lease, Pool, PoolStatus, Slot};
pub use guard::{AdmissionGuard, Guarded};
pub use manager::Manager;
pub use queue::SerialQueue;
