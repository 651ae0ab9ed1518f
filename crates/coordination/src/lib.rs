//! Cross-process coordination primitives for the order lifecycle.
//!
//! - [`DistributedLock`]: advisory, key-scoped mutual exclusion with a TTL
//! - [`DelayQueue`]: a shared time-ordered set of pending order timeouts
//!
//! Both are backed either by Redis ([`RedisCoordinator`]) or by an
//! in-process map ([`InMemoryCoordinator`]).

pub mod delay_queue;
pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_store;

pub use delay_queue::{DELAY_QUEUE_KEY, DelayQueue, DelayQueueEntry, due_score};
pub use error::{CoordinationError, Result};
pub use lock::{DistributedLock, LockBackend, LockGuard, LockOutcome, product_lock_key};
pub use memory::InMemoryCoordinator;
pub use redis_store::RedisCoordinator;

/// Both coordination seams behind one bound.
pub trait CoordinationBackend: LockBackend + DelayQueue + Clone + 'static {}

impl<T> CoordinationBackend for T where T: LockBackend + DelayQueue + Clone + 'static {}
