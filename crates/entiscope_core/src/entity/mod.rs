//! Entity identifiers and state records.

mod id;
mod record;

pub use id::EntityId;
pub use record::{EntityStateRecord, PropertyValue, RecordMap, RecordState};
pub(crate) use record::Lifecycle;
