//! Event bus carrying `created`, `timeout` and `cancelled` order events
//! between the order service, the timeout scheduler and the timeout consumer.
//!
//! Two transports are provided:
//! - [`InMemoryEventBus`]: in-process channels, one per subscriber
//! - [`PgNotifyEventBus`]: PostgreSQL `LISTEN/NOTIFY` on [`CHANNEL`]

pub mod bus;
pub mod error;
pub mod memory;
pub mod pg_notify;

pub use bus::{EventBus, Subscription};
pub use error::{EventBusError, Result};
pub use memory::InMemoryEventBus;
pub use pg_notify::{CHANNEL, PgNotifyEventBus};
