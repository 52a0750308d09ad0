//! Mapping metadata: classes, properties and relation endpoints.
//!
//! Metadata is static and read-only once built. The engine only consumes it
//! through [`MetadataProvider`]; [`MappingConfiguration`] is the in-process
//! implementation assembled with [`MappingBuilder`].

mod builder;
mod definition;

pub use builder::{MappingBuilder, MappingConfiguration, RelationOptions};
pub use definition::{
    Cardinality, ClassDefinition, EndpointDefinition, MetadataProvider, PropertyDefinition,
    RelationDefinition,
};
