//! Registration protocol linking a real endpoint with its opposite side.

use crate::entity::{EntityId, Lifecycle, RecordMap};
use crate::error::{CoreError, CoreResult};
use crate::mapping::{Cardinality, EndpointDefinition, MetadataProvider};
use crate::relation::endpoint::{
    CollectionEndpoint, RealEndpoint, RelationEndpoint, SyncState, VirtualObjectEndpoint,
};
use crate::relation::id::RelationEndpointId;
use crate::relation::registry::RelationEndpointRegistry;
use tracing::trace;

/// Registers and unregisters the endpoints of one record.
///
/// Registering a loaded record's real endpoint tells the opposite endpoint
/// about it without forcing that endpoint to load. An incomplete single-valued
/// opposite is seeded directly with the record instead.
pub(crate) struct RegistrationAgent<'a> {
    metadata: &'a dyn MetadataProvider,
    collect_unused: bool,
}

impl<'a> RegistrationAgent<'a> {
    pub(crate) fn new(metadata: &'a dyn MetadataProvider, collect_unused: bool) -> Self {
        Self {
            metadata,
            collect_unused,
        }
    }

    /// Registers every endpoint a freshly registered record needs.
    pub(crate) fn register_endpoints(
        &self,
        records: &RecordMap,
        registry: &mut RelationEndpointRegistry,
        id: EntityId,
    ) -> CoreResult<()> {
        let record = records
            .get(&id)
            .ok_or_else(|| CoreError::structural(format!("{id} is not registered")))?;
        if record.lifecycle() == Lifecycle::NotLoadedYet {
            return Ok(());
        }
        let is_new = record.lifecycle() == Lifecycle::New;
        let class = self.metadata.require_class(id.class())?;

        for def_id in class.endpoints() {
            let definition = self.metadata.require_endpoint(*def_id)?;
            let endpoint_id = RelationEndpointId::new(id, *def_id);
            if let Some(slot) = definition.foreign_key_slot() {
                let sync = if is_new {
                    SyncState::Synchronized
                } else {
                    let target = record.original_value(slot).as_reference();
                    self.register_with_opposite(registry, id, definition, target)?
                };
                registry.register(RelationEndpoint::Real(RealEndpoint::new(
                    endpoint_id,
                    slot,
                    sync,
                )))?;
            } else if is_new {
                let endpoint = match definition.cardinality() {
                    Cardinality::One => {
                        RelationEndpoint::VirtualObject(VirtualObjectEndpoint::complete_empty(endpoint_id))
                    }
                    Cardinality::Many => {
                        RelationEndpoint::Collection(CollectionEndpoint::complete_empty(endpoint_id))
                    }
                };
                registry.register(endpoint)?;
            }
        }
        Ok(())
    }

    /// Removes the endpoints of a record that is leaving the transaction.
    ///
    /// Must run before the record itself is removed, since the original
    /// foreign keys decide which opposite endpoints hold a registration.
    pub(crate) fn unregister_endpoints(
        &self,
        records: &RecordMap,
        registry: &mut RelationEndpointRegistry,
        id: EntityId,
    ) -> CoreResult<()> {
        let record = records.get(&id);
        let is_new = record.is_some_and(|r| r.lifecycle() == Lifecycle::New);

        for endpoint_id in registry.endpoints_of(id) {
            let definition = self.metadata.require_endpoint(endpoint_id.definition())?;
            if definition.is_real() {
                registry.remove(&endpoint_id);
                if is_new {
                    continue;
                }
                let target = match (record, definition.foreign_key_slot()) {
                    (Some(record), Some(slot)) => record.original_value(slot).as_reference(),
                    _ => None,
                };
                if let (Some(target), Some(opposite)) = (target, definition.opposite()) {
                    self.unregister_from(registry, RelationEndpointId::new(target, opposite), &id);
                }
            } else if is_new {
                registry.remove(&endpoint_id);
            } else {
                self.release_virtual(registry, endpoint_id, definition)?;
            }
        }
        Ok(())
    }

    /// Resolves the sync state of a real endpoint whose original target is
    /// `target`, registering it with the opposite endpoint.
    pub(crate) fn register_with_opposite(
        &self,
        registry: &mut RelationEndpointRegistry,
        owner: EntityId,
        definition: &EndpointDefinition,
        target: Option<EntityId>,
    ) -> CoreResult<SyncState> {
        let (Some(target), Some(opposite)) = (target, self.metadata.opposite_of(definition)?) else {
            return Ok(SyncState::Synchronized);
        };
        let opposite_id = RelationEndpointId::new(target, opposite.id());
        let endpoint = registry.get_or_create_virtual(opposite_id, opposite.cardinality())?;

        if let RelationEndpoint::VirtualObject(object) = endpoint {
            if !object.is_data_complete() {
                trace!(endpoint = %opposite_id, item = %owner, "seeding single-valued endpoint");
                object.register_original_opposite(owner);
                let displaced = object.mark_data_complete(vec![owner])?;
                for other in displaced {
                    registry.set_sync_state(
                        &RelationEndpointId::new(other, definition.id()),
                        SyncState::Unsynchronized,
                    );
                }
                return Ok(SyncState::Synchronized);
            }
        }
        Ok(endpoint.register_original_opposite(owner))
    }

    fn unregister_from(
        &self,
        registry: &mut RelationEndpointRegistry,
        opposite_id: RelationEndpointId,
        item: &EntityId,
    ) {
        let Some(opposite) = registry.get_mut(&opposite_id) else {
            return;
        };
        opposite.unregister_original_opposite(item);
        if self.collect_unused && opposite.can_be_collected() {
            trace!(endpoint = %opposite_id, "collecting unused endpoint");
            registry.remove(&opposite_id);
        }
    }

    /// Turns a virtual endpoint of an unloaded record back into an
    /// incomplete one, dropping it entirely when nothing refers to it.
    pub(crate) fn release_virtual(
        &self,
        registry: &mut RelationEndpointRegistry,
        endpoint_id: RelationEndpointId,
        definition: &EndpointDefinition,
    ) -> CoreResult<()> {
        let Some(endpoint) = registry.get_mut(&endpoint_id) else {
            return Ok(());
        };
        let items = endpoint.original_items();
        endpoint.mark_data_incomplete()?;
        let collectable = endpoint.can_be_collected();
        if let Some(real) = definition.opposite() {
            for item in items {
                registry.set_sync_state(&RelationEndpointId::new(item, real), SyncState::Unknown);
            }
        }
        if self.collect_unused && collectable {
            registry.remove(&endpoint_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityStateRecord;
    use crate::mapping::{MappingBuilder, MappingConfiguration, RelationOptions};
    use crate::types::{ClassId, Timestamp};
    use crate::value::{Value, ValueKind};

    struct Model {
        mapping: MappingConfiguration,
        customer: ClassId,
        order: ClassId,
        person: ClassId,
        orders: crate::types::EndpointDefId,
        order_customer: crate::types::EndpointDefId,
        desk: crate::types::EndpointDefId,
        desk_owner: crate::types::EndpointDefId,
    }

    fn model() -> Model {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").unwrap();
        let order = builder.add_class("Order").unwrap();
        let person = builder.add_class("Person").unwrap();
        builder.add_property(order, "number", ValueKind::Int, true).unwrap();
        let orders = builder
            .add_one_to_many(order, "customer", customer, "orders", RelationOptions::new())
            .unwrap();
        let desk = builder
            .add_one_to_one(order, "owner", person, "desk", RelationOptions::new())
            .unwrap();
        Model {
            mapping: builder.build(),
            customer,
            order,
            person,
            orders: orders.virtual_end.unwrap(),
            order_customer: orders.real,
            desk: desk.virtual_end.unwrap(),
            desk_owner: desk.real,
        }
    }

    fn loaded_order(
        model: &Model,
        records: &mut RecordMap,
        customer: Option<EntityId>,
        person: Option<EntityId>,
    ) -> EntityId {
        let id = EntityId::new(model.order);
        let record = EntityStateRecord::loaded(
            id,
            vec![Value::Int(1), Value::from(customer), Value::from(person)],
            Timestamp::new(1),
        );
        records.register(record).unwrap();
        id
    }

    #[test]
    fn real_endpoint_does_not_force_collection_load() {
        let model = model();
        let agent = RegistrationAgent::new(&model.mapping, true);
        let mut records = RecordMap::new();
        let mut registry = RelationEndpointRegistry::new();
        let customer = EntityId::new(model.customer);
        let order = loaded_order(&model, &mut records, Some(customer), None);

        agent.register_endpoints(&records, &mut registry, order).unwrap();

        let real = registry
            .get(&RelationEndpointId::new(order, model.order_customer))
            .unwrap();
        assert_eq!(real.as_real().unwrap().sync_state(), SyncState::Unknown);
        let opposite = registry
            .get(&RelationEndpointId::new(customer, model.orders))
            .unwrap()
            .as_collection()
            .unwrap();
        assert!(!opposite.is_data_complete());
        assert!(opposite.registered_opposites().contains(&order));
    }

    #[test]
    fn single_valued_opposite_is_seeded() {
        let model = model();
        let agent = RegistrationAgent::new(&model.mapping, true);
        let mut records = RecordMap::new();
        let mut registry = RelationEndpointRegistry::new();
        let person = EntityId::new(model.person);
        let order = loaded_order(&model, &mut records, None, Some(person));

        agent.register_endpoints(&records, &mut registry, order).unwrap();

        let real = registry
            .get(&RelationEndpointId::new(order, model.desk_owner))
            .unwrap();
        assert_eq!(real.as_real().unwrap().sync_state(), SyncState::Synchronized);
        let desk = registry
            .get(&RelationEndpointId::new(person, model.desk))
            .unwrap()
            .as_virtual_object()
            .unwrap();
        assert!(desk.is_data_complete());
        assert_eq!(desk.related(), Some(order));
    }

    #[test]
    fn unregister_collects_unused_opposite() {
        let model = model();
        let agent = RegistrationAgent::new(&model.mapping, true);
        let mut records = RecordMap::new();
        let mut registry = RelationEndpointRegistry::new();
        let customer = EntityId::new(model.customer);
        let order = loaded_order(&model, &mut records, Some(customer), None);
        agent.register_endpoints(&records, &mut registry, order).unwrap();

        agent.unregister_endpoints(&records, &mut registry, order).unwrap();

        assert!(registry.is_empty());
    }

    #[test]
    fn new_record_gets_complete_virtual_endpoints() {
        let model = model();
        let agent = RegistrationAgent::new(&model.mapping, true);
        let mut records = RecordMap::new();
        let mut registry = RelationEndpointRegistry::new();
        let customer = EntityId::new(model.customer);
        records
            .register(EntityStateRecord::new_object(customer, 0))
            .unwrap();

        agent.register_endpoints(&records, &mut registry, customer).unwrap();

        let orders = registry
            .get(&RelationEndpointId::new(customer, model.orders))
            .unwrap();
        assert!(orders.is_data_complete());
    }
}
