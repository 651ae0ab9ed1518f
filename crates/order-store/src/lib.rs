//! Persistence for orders, inventory, carts and the catalog snapshots they
//! reference.
//!
//! Stock is only ever changed through conditional updates evaluated by the
//! storage layer itself, never through read-then-write in application code.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use store::{
    AddressBook, CartStore, InventoryStore, NotificationSink, OrderBackend, OrderStore,
    OrderTransaction, ProductCatalog,
};
