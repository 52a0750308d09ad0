//! Relation endpoint identifiers.

use crate::entity::EntityId;
use crate::types::EndpointDefId;
use std::fmt;

/// Identifies one side of one relationship instance.
///
/// A null entity denotes the opposite side of a relation that points at
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationEndpointId {
    entity: Option<EntityId>,
    definition: EndpointDefId,
}

impl RelationEndpointId {
    /// Creates an endpoint ID for an entity.
    #[must_use]
    pub const fn new(entity: EntityId, definition: EndpointDefId) -> Self {
        Self {
            entity: Some(entity),
            definition,
        }
    }

    /// Creates the ID of a null endpoint.
    #[must_use]
    pub const fn null(definition: EndpointDefId) -> Self {
        Self {
            entity: None,
            definition,
        }
    }

    /// Creates an endpoint ID from an optional entity.
    #[must_use]
    pub const fn for_entity(entity: Option<EntityId>, definition: EndpointDefId) -> Self {
        Self { entity, definition }
    }

    /// Returns the owning entity, `None` for a null endpoint.
    #[must_use]
    pub const fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Returns the endpoint definition.
    #[must_use]
    pub const fn definition(&self) -> EndpointDefId {
        self.definition
    }

    /// Returns true for a null endpoint.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.entity.is_none()
    }
}

impl fmt::Display for RelationEndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{entity}/{}", self.definition),
            None => write!(f, "null/{}", self.definition),
        }
    }
}

/// How much work `get_relation_endpoint` may do to produce an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPolicy {
    /// Return the endpoint only if it is already registered.
    WithoutLoading,
    /// Register the endpoint if needed but leave its data incomplete.
    MinimumLoading,
    /// Register the endpoint and make sure its data is complete.
    WithLazyLoad,
}
