//! Persistence contract, in-memory store and store statistics.

mod memory;
mod stats;
mod strategy;

pub use memory::{InMemoryStore, StoredRow};
pub use stats::{StatsSnapshot, StoreStats};
pub use strategy::{PersistState, PersistableRecord, PersistenceStrategy};
