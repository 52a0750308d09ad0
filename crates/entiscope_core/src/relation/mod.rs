//! Relation endpoints and their bookkeeping.
//!
//! Every relation instance has up to two endpoints. The real endpoint owns
//! the foreign key inside an entity record and is always complete; the
//! virtual side (single object or collection) is loaded lazily and tracks
//! which real endpoints have registered themselves against it.

mod agent;
mod command;
mod endpoint;
mod id;
mod registry;

pub(crate) use agent::RegistrationAgent;
pub(crate) use command::{Modification, RelationCommand};
pub use endpoint::{
    CollectionData, CollectionEndpoint, EndpointData, LoadState, NullEndpoint, ObjectData,
    RealEndpoint, RelationEndpoint, SyncState, VirtualEndpoint, VirtualObjectEndpoint,
};
pub use id::{LoadPolicy, RelationEndpointId};
pub use registry::RelationEndpointRegistry;
