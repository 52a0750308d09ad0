//! Mapping builder and the in-process metadata provider.

use crate::error::{CoreError, CoreResult};
use crate::mapping::definition::{
    Cardinality, ClassDefinition, EndpointDefinition, MetadataProvider, PropertyDefinition,
    RelationDefinition,
};
use crate::types::{ClassId, EndpointDefId};
use crate::value::ValueKind;

/// Options for a relation definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationOptions {
    /// The foreign-key side must reference an entity at commit.
    pub real_mandatory: bool,
    /// The virtual side must be non-empty (collection) or set (single).
    pub virtual_mandatory: bool,
}

impl RelationOptions {
    /// Creates options with both sides optional.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            real_mandatory: false,
            virtual_mandatory: false,
        }
    }

    /// Makes the foreign-key side mandatory.
    #[must_use]
    pub const fn real_mandatory(mut self) -> Self {
        self.real_mandatory = true;
        self
    }

    /// Makes the virtual side mandatory.
    #[must_use]
    pub const fn virtual_mandatory(mut self) -> Self {
        self.virtual_mandatory = true;
        self
    }
}

/// Builds a [`MappingConfiguration`].
///
/// # Example
///
/// ```rust
/// use entiscope_core::{MappingBuilder, RelationOptions, ValueKind};
///
/// let mut builder = MappingBuilder::new();
/// let customer = builder.add_class("Customer").unwrap();
/// let order = builder.add_class("Order").unwrap();
/// builder.add_property(customer, "name", ValueKind::Text, false).unwrap();
/// builder
///     .add_one_to_many(order, "customer", customer, "orders", RelationOptions::new())
///     .unwrap();
/// let mapping = builder.build();
/// assert_eq!(mapping.classes().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct MappingBuilder {
    classes: Vec<ClassDefinition>,
    endpoints: Vec<EndpointDefinition>,
}

impl MappingBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a class.
    pub fn add_class(&mut self, name: &str) -> CoreResult<ClassId> {
        if self.classes.iter().any(|c| c.name == name) {
            return Err(CoreError::mapping(format!("class '{name}' declared twice")));
        }
        let id = ClassId::new(self.classes.len() as u32 + 1);
        self.classes.push(ClassDefinition {
            id,
            name: name.to_string(),
            properties: Vec::new(),
            endpoints: Vec::new(),
        });
        Ok(id)
    }

    /// Declares a scalar property and returns its slot.
    pub fn add_property(
        &mut self,
        class: ClassId,
        name: &str,
        kind: ValueKind,
        nullable: bool,
    ) -> CoreResult<usize> {
        if kind == ValueKind::Reference {
            return Err(CoreError::mapping(format!(
                "reference property '{name}' must be declared as a relation"
            )));
        }
        self.push_property(class, name, kind, nullable, None)
    }

    /// Declares a many-to-one relation: each `real_class` entity references one
    /// `virtual_class` entity, which sees a collection of them.
    pub fn add_one_to_many(
        &mut self,
        real_class: ClassId,
        real_property: &str,
        virtual_class: ClassId,
        virtual_property: &str,
        options: RelationOptions,
    ) -> CoreResult<RelationDefinition> {
        self.add_bidirectional(
            real_class,
            real_property,
            virtual_class,
            virtual_property,
            Cardinality::Many,
            options,
        )
    }

    /// Declares a one-to-one relation owned by `real_class`.
    pub fn add_one_to_one(
        &mut self,
        real_class: ClassId,
        real_property: &str,
        virtual_class: ClassId,
        virtual_property: &str,
        options: RelationOptions,
    ) -> CoreResult<RelationDefinition> {
        self.add_bidirectional(
            real_class,
            real_property,
            virtual_class,
            virtual_property,
            Cardinality::One,
            options,
        )
    }

    /// Declares a unidirectional reference without an opposite endpoint.
    pub fn add_unidirectional(
        &mut self,
        real_class: ClassId,
        real_property: &str,
        target: ClassId,
        options: RelationOptions,
    ) -> CoreResult<RelationDefinition> {
        self.class_index(target)?;
        let real = self.next_endpoint_id();
        let slot = self.push_property(
            real_class,
            real_property,
            ValueKind::Reference,
            true,
            Some(real),
        )?;
        self.push_endpoint(EndpointDefinition {
            id: real,
            class: real_class,
            property: real_property.to_string(),
            cardinality: Cardinality::One,
            is_virtual: false,
            mandatory: options.real_mandatory,
            target,
            opposite: None,
            slot: Some(slot),
        })?;
        Ok(RelationDefinition {
            real,
            virtual_end: None,
        })
    }

    /// Finishes the mapping.
    #[must_use]
    pub fn build(self) -> MappingConfiguration {
        MappingConfiguration {
            classes: self.classes,
            endpoints: self.endpoints,
        }
    }

    fn add_bidirectional(
        &mut self,
        real_class: ClassId,
        real_property: &str,
        virtual_class: ClassId,
        virtual_property: &str,
        cardinality: Cardinality,
        options: RelationOptions,
    ) -> CoreResult<RelationDefinition> {
        self.ensure_name_free(virtual_class, virtual_property)?;
        let real = self.next_endpoint_id();
        let virtual_end = EndpointDefId::new(real.as_u32() + 1);

        let slot = self.push_property(
            real_class,
            real_property,
            ValueKind::Reference,
            true,
            Some(real),
        )?;
        self.push_endpoint(EndpointDefinition {
            id: real,
            class: real_class,
            property: real_property.to_string(),
            cardinality: Cardinality::One,
            is_virtual: false,
            mandatory: options.real_mandatory,
            target: virtual_class,
            opposite: Some(virtual_end),
            slot: Some(slot),
        })?;
        self.push_endpoint(EndpointDefinition {
            id: virtual_end,
            class: virtual_class,
            property: virtual_property.to_string(),
            cardinality,
            is_virtual: true,
            mandatory: options.virtual_mandatory,
            target: real_class,
            opposite: Some(real),
            slot: None,
        })?;
        Ok(RelationDefinition {
            real,
            virtual_end: Some(virtual_end),
        })
    }

    fn next_endpoint_id(&self) -> EndpointDefId {
        EndpointDefId::new(self.endpoints.len() as u32 + 1)
    }

    fn class_index(&self, class: ClassId) -> CoreResult<usize> {
        self.classes
            .iter()
            .position(|c| c.id == class)
            .ok_or_else(|| CoreError::mapping(format!("unknown class {class}")))
    }

    fn ensure_name_free(&self, class: ClassId, name: &str) -> CoreResult<()> {
        let index = self.class_index(class)?;
        let taken_by_property = self.classes[index].properties.iter().any(|p| p.name == name);
        let taken_by_endpoint = self
            .endpoints
            .iter()
            .any(|e| e.class == class && e.property == name);
        if taken_by_property || taken_by_endpoint {
            return Err(CoreError::mapping(format!(
                "class {} already declares '{name}'",
                self.classes[index].name
            )));
        }
        Ok(())
    }

    fn push_property(
        &mut self,
        class: ClassId,
        name: &str,
        kind: ValueKind,
        nullable: bool,
        relation: Option<EndpointDefId>,
    ) -> CoreResult<usize> {
        self.ensure_name_free(class, name)?;
        let index = self.class_index(class)?;
        let properties = &mut self.classes[index].properties;
        properties.push(PropertyDefinition {
            name: name.to_string(),
            kind,
            nullable,
            relation,
        });
        Ok(properties.len() - 1)
    }

    fn push_endpoint(&mut self, endpoint: EndpointDefinition) -> CoreResult<()> {
        let index = self.class_index(endpoint.class)?;
        self.classes[index].endpoints.push(endpoint.id);
        self.endpoints.push(endpoint);
        Ok(())
    }
}

/// Static mapping metadata held in memory.
#[derive(Debug, Clone, Default)]
pub struct MappingConfiguration {
    classes: Vec<ClassDefinition>,
    endpoints: Vec<EndpointDefinition>,
}

impl MappingConfiguration {
    /// Returns every class definition.
    #[must_use]
    pub fn classes(&self) -> &[ClassDefinition] {
        &self.classes
    }

    /// Looks up a class by name.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.iter().find(|c| c.name == name)
    }
}

impl MetadataProvider for MappingConfiguration {
    fn class(&self, id: ClassId) -> Option<&ClassDefinition> {
        // Class IDs are dense and start at 1.
        self.classes.get((id.as_u32() as usize).wrapping_sub(1))
    }

    fn endpoint(&self, id: EndpointDefId) -> Option<&EndpointDefinition> {
        self.endpoints.get((id.as_u32() as usize).wrapping_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> (MappingConfiguration, ClassId, ClassId, RelationDefinition) {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").unwrap();
        let order = builder.add_class("Order").unwrap();
        builder
            .add_property(customer, "name", ValueKind::Text, false)
            .unwrap();
        builder
            .add_property(order, "number", ValueKind::Int, false)
            .unwrap();
        let relation = builder
            .add_one_to_many(
                order,
                "customer",
                customer,
                "orders",
                RelationOptions::new().real_mandatory(),
            )
            .unwrap();
        (builder.build(), customer, order, relation)
    }

    #[test]
    fn relation_endpoints_point_at_each_other() {
        let (mapping, customer, order, relation) = mapping();
        let real = mapping.endpoint(relation.real).unwrap();
        let virtual_end = mapping.endpoint(relation.virtual_end.unwrap()).unwrap();

        assert!(real.is_real());
        assert!(real.is_mandatory());
        assert_eq!(real.class(), order);
        assert_eq!(real.target(), customer);
        assert_eq!(real.opposite(), Some(virtual_end.id()));
        assert_eq!(virtual_end.opposite(), Some(real.id()));
        assert_eq!(virtual_end.cardinality(), Cardinality::Many);
    }

    #[test]
    fn real_endpoint_owns_foreign_key_slot() {
        let (mapping, _, order, relation) = mapping();
        let class = mapping.class(order).unwrap();
        let slot = class.property_slot("customer").unwrap();
        let real = mapping.endpoint(relation.real).unwrap();

        assert_eq!(real.foreign_key_slot(), Some(slot));
        assert_eq!(class.properties()[slot].kind(), ValueKind::Reference);
        assert_eq!(class.properties()[slot].relation(), Some(relation.real));
    }

    #[test]
    fn endpoint_by_property() {
        let (mapping, customer, _, relation) = mapping();
        let found = mapping.endpoint_by_property(customer, "orders").unwrap();
        assert_eq!(Some(found.id()), relation.virtual_end);
        assert!(matches!(
            mapping.endpoint_by_property(customer, "missing"),
            Err(CoreError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").unwrap();
        builder
            .add_property(customer, "name", ValueKind::Text, true)
            .unwrap();
        assert!(builder
            .add_property(customer, "name", ValueKind::Int, true)
            .is_err());
        assert!(builder.add_class("Customer").is_err());
    }

    #[test]
    fn reference_properties_need_relations() {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").unwrap();
        assert!(builder
            .add_property(customer, "boss", ValueKind::Reference, true)
            .is_err());
    }
}
