//! Class, property and endpoint definitions.

use crate::error::{CoreError, CoreResult};
use crate::types::{ClassId, EndpointDefId};
use crate::value::ValueKind;

/// Number of entities on one side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one related entity.
    One,
    /// Any number of related entities.
    Many,
}

/// One slot of a class's property table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub(crate) name: String,
    pub(crate) kind: ValueKind,
    pub(crate) nullable: bool,
    pub(crate) relation: Option<EndpointDefId>,
}

impl PropertyDefinition {
    /// Returns the property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared value kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Returns true if the property may hold null at commit time.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns the real endpoint this foreign-key slot belongs to.
    #[must_use]
    pub fn relation(&self) -> Option<EndpointDefId> {
        self.relation
    }
}

/// A persistent class with its accessor table.
///
/// Properties are addressed by slot; the slot of a name never changes once
/// the mapping is built, so records can store values in a plain vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    pub(crate) id: ClassId,
    pub(crate) name: String,
    pub(crate) properties: Vec<PropertyDefinition>,
    pub(crate) endpoints: Vec<EndpointDefId>,
}

impl ClassDefinition {
    /// Returns the class ID.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Returns the class name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the property table.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    /// Returns the slot of a property.
    #[must_use]
    pub fn property_slot(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Returns the slot of a property or an `UnknownProperty` error.
    pub fn require_slot(&self, name: &str) -> CoreResult<usize> {
        self.property_slot(name)
            .ok_or_else(|| CoreError::UnknownProperty {
                class: self.id,
                property: name.to_string(),
            })
    }

    /// Returns every relation endpoint declared on this class.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDefId] {
        &self.endpoints
    }
}

/// One side of a relation definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDefinition {
    pub(crate) id: EndpointDefId,
    pub(crate) class: ClassId,
    pub(crate) property: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) is_virtual: bool,
    pub(crate) mandatory: bool,
    pub(crate) target: ClassId,
    pub(crate) opposite: Option<EndpointDefId>,
    pub(crate) slot: Option<usize>,
}

impl EndpointDefinition {
    /// Returns the endpoint definition ID.
    #[must_use]
    pub fn id(&self) -> EndpointDefId {
        self.id
    }

    /// Returns the class declaring this endpoint.
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Returns the relation property name.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns the cardinality of this side.
    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Returns true for the non-owning side of a bidirectional relation.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Returns true for the foreign-key owning side.
    #[must_use]
    pub fn is_real(&self) -> bool {
        !self.is_virtual
    }

    /// Returns true if the relation must be set at commit time.
    #[must_use]
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    /// Returns the class of related entities.
    #[must_use]
    pub fn target(&self) -> ClassId {
        self.target
    }

    /// Returns the opposite endpoint, `None` for unidirectional relations.
    #[must_use]
    pub fn opposite(&self) -> Option<EndpointDefId> {
        self.opposite
    }

    /// Returns the foreign-key slot of a real endpoint.
    #[must_use]
    pub fn foreign_key_slot(&self) -> Option<usize> {
        self.slot
    }
}

/// The endpoint pair created for one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDefinition {
    /// The foreign-key owning side.
    pub real: EndpointDefId,
    /// The non-owning side, absent for unidirectional relations.
    pub virtual_end: Option<EndpointDefId>,
}

/// Source of static mapping metadata.
///
/// Implementations are shared read-only across all transactions.
pub trait MetadataProvider: Send + Sync {
    /// Returns a class definition.
    fn class(&self, id: ClassId) -> Option<&ClassDefinition>;

    /// Returns an endpoint definition.
    fn endpoint(&self, id: EndpointDefId) -> Option<&EndpointDefinition>;

    /// Returns a class definition or a mapping error.
    fn require_class(&self, id: ClassId) -> CoreResult<&ClassDefinition> {
        self.class(id)
            .ok_or_else(|| CoreError::mapping(format!("unknown class {id}")))
    }

    /// Returns an endpoint definition or a mapping error.
    fn require_endpoint(&self, id: EndpointDefId) -> CoreResult<&EndpointDefinition> {
        self.endpoint(id)
            .ok_or_else(|| CoreError::mapping(format!("unknown endpoint {id}")))
    }

    /// Resolves a relation property of a class.
    fn endpoint_by_property(&self, class: ClassId, property: &str) -> CoreResult<&EndpointDefinition> {
        let definition = self.require_class(class)?;
        definition
            .endpoints()
            .iter()
            .filter_map(|id| self.endpoint(*id))
            .find(|e| e.property() == property)
            .ok_or_else(|| CoreError::UnknownProperty {
                class,
                property: property.to_string(),
            })
    }

    /// Returns the opposite side of an endpoint definition.
    fn opposite_of(&self, endpoint: &EndpointDefinition) -> CoreResult<Option<&EndpointDefinition>> {
        endpoint
            .opposite()
            .map(|id| self.require_endpoint(id))
            .transpose()
    }
}
