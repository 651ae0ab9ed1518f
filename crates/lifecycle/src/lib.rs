//! Order lifecycle engine.
//!
//! - [`OrderService`] turns a cart into a `pending_payment` order under
//!   contended inventory and schedules its payment timeout.
//! - [`TimeoutScheduler`] moves due timeouts from the delay queue onto the
//!   event bus.
//! - [`TimeoutConsumer`] cancels orders still unpaid at timeout and restores
//!   their stock.

pub mod clock;
pub mod config;
pub mod consumer;
pub mod error;
pub mod order_service;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LifecycleConfig;
pub use consumer::{ConsumeOutcome, TimeoutConsumer};
pub use error::{LifecycleError, Result};
pub use order_service::OrderService;
pub use scheduler::TimeoutScheduler;
