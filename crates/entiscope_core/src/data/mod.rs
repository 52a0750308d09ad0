//! Transaction-local data management.
//!
//! A [`DataManager`] owns the records, relation endpoints and invalid-object
//! set of one transaction. Operations receive an `OperationContext` that
//! supplies the record source and the event sink of the owning transaction.

mod loader;
mod manager;
mod relations;

pub(crate) use loader::{OperationContext, StoreLoader};
pub use loader::RecordLoader;
pub use manager::DataManager;

#[cfg(test)]
pub(crate) use manager::tests;
