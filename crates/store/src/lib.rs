//! Persistent-store boundary for the fulfillment engine.
//!
//! Orchestrators never hold locks of their own. Every state-mutating sequence
//! (reserve, update counters, append events) runs as one unit of work through
//! [`FulfillmentStore::transaction`], and the store serializes units that
//! touch the same rows.

pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, MemoryState};
pub use repository::{
    AllocationRepository, BinRepository, EventStaging, IdempotencyRepository, InventoryRepository,
    LocationRepository, OrderRepository, PackageRepository, StoreTx, TaskRepository,
};
pub use store::{Committed, FulfillmentStore};
