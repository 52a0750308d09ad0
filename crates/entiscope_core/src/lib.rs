//! # Entiscope Core
//!
//! Unit-of-work and change-tracking engine.
//!
//! This crate provides:
//! - Transaction hierarchies (root, nested sub-transactions, binding roots)
//! - Entity state records with per-property change tracking
//! - Lazily loaded relation endpoints with opposite-end synchronization
//! - An ordered event broker with a read-only guard
//! - Staged commit/rollback against a [`PersistenceStrategy`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use entiscope_core::{TransactionFactory, Value};
//!
//! let factory = TransactionFactory::new(metadata, store);
//! let mut hierarchy = factory.create_root();
//! let mut tx = hierarchy.root();
//! let customer = tx.new_entity(customer_class)?;
//! tx.set_value(customer, "name", Value::text("Ada"))?;
//! tx.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod config;
mod data;
mod entity;
mod error;
mod event;
mod mapping;
mod persistence;
mod relation;
mod transaction;
mod types;
mod value;

pub use config::Config;
pub use data::{DataManager, RecordLoader};
pub use entity::{EntityId, EntityStateRecord, PropertyValue, RecordMap, RecordState};
pub use error::{CoreError, CoreResult};
pub use event::{
    EventBroker, EventKind, ExtensionFactory, SubscriptionId, TransactionEvent,
    TransactionExtension,
};
pub use mapping::{
    Cardinality, ClassDefinition, EndpointDefinition, MappingBuilder, MappingConfiguration,
    MetadataProvider, PropertyDefinition, RelationDefinition, RelationOptions,
};
pub use persistence::{
    InMemoryStore, PersistState, PersistableRecord, PersistenceStrategy, StatsSnapshot,
    StoreStats, StoredRow,
};
pub use relation::{
    CollectionData, CollectionEndpoint, EndpointData, LoadPolicy, LoadState, NullEndpoint,
    ObjectData, RealEndpoint, RelationEndpoint, RelationEndpointId, RelationEndpointRegistry,
    SyncState, VirtualEndpoint, VirtualObjectEndpoint,
};
pub use transaction::{
    Transaction, TransactionFactory, TransactionHierarchy, TransactionKind, TransactionLock,
    TransactionUnlocker,
};
pub use types::{ClassId, EndpointDefId, Timestamp, TransactionId};
pub use value::{Value, ValueKind};
