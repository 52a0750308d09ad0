//! # Entiscope Testkit
//!
//! Test utilities for entiscope.
//!
//! This crate provides:
//! - An order-management mapping and a seeded in-memory store
//! - A recording event log for asserting event sequences
//! - Property-based test generators using proptest
//! - A `tracing` subscriber initializer for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entiscope_testkit::prelude::*;
//!
//! #[test]
//! fn loads_customer() {
//!     let seeded = seeded();
//!     let factory = seeded.factory();
//!     let mut hierarchy = factory.create_root();
//!     let mut tx = hierarchy.root();
//!     assert_eq!(tx.get_value(seeded.ada, "name").unwrap(), Value::text("Ada"));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod listener;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::listener::*;
    pub use crate::logging::*;
    pub use entiscope_core::{
        CoreError, EntityId, EventKind, LoadPolicy, RecordState, RelationEndpointId,
        TransactionEvent, TransactionFactory, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use listener::*;
pub use logging::*;
