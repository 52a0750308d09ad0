//! Per-transaction data: records, relation endpoints and invalid objects.

use crate::config::Config;
use crate::data::loader::OperationContext;
use crate::entity::{EntityId, EntityStateRecord, Lifecycle, RecordMap, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::TransactionEvent;
use crate::mapping::MetadataProvider;
use crate::relation::{RegistrationAgent, RelationEndpoint, RelationEndpointId, RelationEndpointRegistry};
use crate::types::{ClassId, TransactionId};
use crate::value::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Owns everything one transaction knows about its entities.
///
/// Read access is public; all mutation goes through the transaction so that
/// events are raised and the read-only guard applies.
pub struct DataManager {
    pub(crate) transaction: TransactionId,
    pub(crate) metadata: Arc<dyn MetadataProvider>,
    pub(crate) config: Config,
    pub(crate) records: RecordMap,
    pub(crate) endpoints: RelationEndpointRegistry,
    pub(crate) invalid: HashSet<EntityId>,
}

impl DataManager {
    pub(crate) fn new(
        transaction: TransactionId,
        metadata: Arc<dyn MetadataProvider>,
        config: Config,
        invalid: HashSet<EntityId>,
    ) -> Self {
        Self {
            transaction,
            metadata,
            config,
            records: RecordMap::new(),
            endpoints: RelationEndpointRegistry::new(),
            invalid,
        }
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Returns the registered records.
    #[must_use]
    pub fn records(&self) -> &RecordMap {
        &self.records
    }

    /// Returns the registered relation endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &RelationEndpointRegistry {
        &self.endpoints
    }

    /// Returns the record of `id` if it is registered.
    #[must_use]
    pub fn record(&self, id: EntityId) -> Option<&EntityStateRecord> {
        self.records.get(&id)
    }

    /// Returns the endpoint `id` if it is registered.
    #[must_use]
    pub fn endpoint(&self, id: RelationEndpointId) -> Option<&RelationEndpoint> {
        self.endpoints.get(&id)
    }

    /// Returns true if `id` is permanently invalid here.
    #[must_use]
    pub fn is_invalid(&self, id: EntityId) -> bool {
        self.invalid.contains(&id)
    }

    /// Returns the invalid objects, sorted.
    #[must_use]
    pub fn invalid_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.invalid.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Returns the state of `id` without loading anything.
    #[must_use]
    pub fn state_of(&self, id: EntityId) -> RecordState {
        if self.invalid.contains(&id) {
            return RecordState::Invalid;
        }
        self.records
            .get(&id)
            .map_or(RecordState::NotLoadedYet, EntityStateRecord::state)
    }

    /// Returns true if any record or endpoint carries uncommitted changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.records.in_registration_order().iter().any(|r| r.has_been_touched())
            || self.endpoints.iter().any(RelationEndpoint::has_been_touched)
    }

    pub(crate) fn metadata(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    pub(crate) fn mark_invalid(&mut self, id: EntityId) {
        self.invalid.insert(id);
    }

    pub(crate) fn mark_valid(&mut self, id: EntityId) {
        self.invalid.remove(&id);
    }

    /// Registers a record and its endpoints.
    pub(crate) fn register_record(
        &mut self,
        ctx: &mut OperationContext<'_>,
        record: EntityStateRecord,
    ) -> CoreResult<()> {
        let id = record.id();
        ctx.events.raise_event(TransactionEvent::RecordRegistering {
            id,
            state: record.state(),
        })?;
        self.records.register(record)?;
        let agent = RegistrationAgent::new(self.metadata.as_ref(), self.config.collect_unused_endpoints);
        agent.register_endpoints(&self.records, &mut self.endpoints, id)
    }

    /// Unregisters the endpoints of `id` and drops its record.
    pub(crate) fn remove_record(&mut self, id: EntityId) -> CoreResult<Option<EntityStateRecord>> {
        let agent = RegistrationAgent::new(self.metadata.as_ref(), self.config.collect_unused_endpoints);
        agent.unregister_endpoints(&self.records, &mut self.endpoints, id)?;
        Ok(self.records.remove(&id))
    }

    /// Drops a new record for good: it becomes invalid in this transaction.
    pub(crate) fn discard_new(&mut self, id: EntityId) -> CoreResult<()> {
        if let Some(mut record) = self.remove_record(id)? {
            record.discard();
        }
        self.invalid.insert(id);
        trace!(transaction = %self.transaction, entity = %id, "discarded new object");
        Ok(())
    }

    /// Makes sure the data of `id` is loaded. Returns false if the entity
    /// does not exist.
    pub(crate) fn ensure_loaded(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
    ) -> CoreResult<bool> {
        if self.invalid.contains(&id) {
            return Err(CoreError::ObjectInvalid { id });
        }
        let inserted_placeholder = match self.records.get(&id) {
            Some(record) if record.lifecycle() != Lifecycle::NotLoadedYet => return Ok(true),
            Some(_) => false,
            None => {
                self.records.register(EntityStateRecord::not_loaded(id))?;
                true
            }
        };

        let result = self.load_into_placeholder(ctx, id);
        let still_placeholder = self
            .records
            .get(&id)
            .is_some_and(|r| r.lifecycle() == Lifecycle::NotLoadedYet);
        if inserted_placeholder && still_placeholder && !matches!(result, Ok(true)) {
            self.records.remove(&id);
        }
        result
    }

    fn load_into_placeholder(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
    ) -> CoreResult<bool> {
        debug!(transaction = %self.transaction, entity = %id, "loading object");
        ctx.events
            .raise_event(TransactionEvent::ObjectsLoading { ids: vec![id] })?;
        match ctx.loader.load_record(id)? {
            Some(record) => {
                if record.id() != id {
                    return Err(CoreError::persistence(format!(
                        "loader returned {} when asked for {id}",
                        record.id()
                    )));
                }
                self.register_record(ctx, record)?;
                ctx.events
                    .raise_event(TransactionEvent::ObjectsLoaded { ids: vec![id] })?;
                Ok(true)
            }
            None => {
                ctx.events
                    .raise_event(TransactionEvent::ObjectsNotFound { ids: vec![id] })?;
                Ok(false)
            }
        }
    }

    /// Returns the record of `id`, loading it if needed.
    pub(crate) fn get_or_load(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
    ) -> CoreResult<&EntityStateRecord> {
        if !self.ensure_loaded(ctx, id)? {
            return Err(CoreError::NotFound { id });
        }
        self.records.get(&id).ok_or(CoreError::NotFound { id })
    }

    /// Like [`get_or_load`](Self::get_or_load) but maps a missing entity to `None`.
    pub(crate) fn try_get_or_load(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
    ) -> CoreResult<Option<&EntityStateRecord>> {
        if !self.ensure_loaded(ctx, id)? {
            return Ok(None);
        }
        Ok(self.records.get(&id))
    }

    /// Returns the record of `id` if it can be read and written.
    pub(crate) fn usable_record(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
    ) -> CoreResult<&EntityStateRecord> {
        let record = self.get_or_load(ctx, id)?;
        record.ensure_usable()?;
        Ok(record)
    }

    /// Registers a placeholder for `id` without loading it. Returns false if
    /// the entity was already known.
    pub(crate) fn enlist(&mut self, ctx: &mut OperationContext<'_>, id: EntityId) -> CoreResult<bool> {
        if self.invalid.contains(&id) {
            return Err(CoreError::ObjectInvalid { id });
        }
        if self.records.contains(&id) {
            return Ok(false);
        }
        self.metadata.require_class(id.class())?;
        self.register_record(ctx, EntityStateRecord::not_loaded(id))?;
        Ok(true)
    }

    /// Creates a new entity of `class`.
    pub(crate) fn new_object(
        &mut self,
        ctx: &mut OperationContext<'_>,
        class: ClassId,
    ) -> CoreResult<EntityId> {
        let property_count = self.metadata.require_class(class)?.properties().len();
        ctx.events
            .raise_event(TransactionEvent::NewObjectCreating { class })?;
        let id = ctx.loader.new_id(class)?;
        if id.class() != class {
            return Err(CoreError::persistence(format!(
                "new ID {id} does not belong to class {class}"
            )));
        }
        if self.records.contains(&id) || self.invalid.contains(&id) {
            return Err(CoreError::structural(format!("new ID {id} is already in use")));
        }
        self.register_record(ctx, EntityStateRecord::new_object(id, property_count))?;
        debug!(transaction = %self.transaction, entity = %id, "created new object");
        Ok(id)
    }

    fn scalar_slot(&self, id: EntityId, property: &str) -> CoreResult<usize> {
        let class = self.metadata.require_class(id.class())?;
        let slot = class.require_slot(property)?;
        if class.properties()[slot].relation().is_some() {
            return Err(CoreError::structural(format!(
                "'{property}' is a relation property; use the relation operations"
            )));
        }
        Ok(slot)
    }

    /// Reads a scalar property.
    pub(crate) fn get_value(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Value> {
        let slot = self.scalar_slot(id, property)?;
        let record = self.usable_record(ctx, id)?;
        Ok(record.value(slot).clone())
    }

    /// Returns the original value of a scalar property.
    pub(crate) fn get_original_value(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Value> {
        let slot = self.scalar_slot(id, property)?;
        let record = self.usable_record(ctx, id)?;
        Ok(record.original_value(slot).clone())
    }

    /// Writes a scalar property between changing and changed notifications.
    pub(crate) fn set_value(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: EntityId,
        property: &str,
        value: Value,
    ) -> CoreResult<()> {
        let slot = self.scalar_slot(id, property)?;
        let kind = self.metadata.require_class(id.class())?.properties()[slot].kind();
        if !value.fits(kind) {
            return Err(CoreError::structural(format!(
                "cannot assign {value} to {kind:?} property '{property}'"
            )));
        }
        let old = self.usable_record(ctx, id)?.value(slot).clone();

        ctx.events.raise_event(TransactionEvent::PropertyValueChanging {
            id,
            property: property.to_string(),
            old: old.clone(),
            new: value.clone(),
        })?;
        self.records
            .get_mut(&id)
            .ok_or(CoreError::NotFound { id })?
            .set_value(slot, value.clone())?;
        ctx.events.raise_event(TransactionEvent::PropertyValueChanged {
            id,
            property: property.to_string(),
            old,
            new: value,
        })
    }

    /// Forces `id` into the next commit set.
    pub(crate) fn mark_changed(&mut self, ctx: &mut OperationContext<'_>, id: EntityId) -> CoreResult<()> {
        self.usable_record(ctx, id)?;
        ctx.events
            .raise_event(TransactionEvent::MarkingChanged { id })?;
        self.records
            .get_mut(&id)
            .ok_or(CoreError::NotFound { id })?
            .mark_changed()
    }

    /// Returns true if `id` and all its endpoints are free of changes.
    pub(crate) fn can_unload(&self, id: EntityId) -> bool {
        let record_clean = self.records.get(&id).is_some_and(|r| {
            matches!(r.state(), RecordState::Unchanged | RecordState::NotLoadedYet)
        });
        record_clean
            && self.endpoints.endpoints_of(id).iter().all(|endpoint_id| {
                self.endpoints
                    .get(endpoint_id)
                    .is_some_and(|e| !e.has_been_touched() && !e.has_changed(&self.records))
            })
    }

    /// Unloads unchanged objects. Unknown IDs are ignored; a changed object
    /// fails the whole call before anything is unloaded.
    pub(crate) fn unload(&mut self, ctx: &mut OperationContext<'_>, ids: &[EntityId]) -> CoreResult<()> {
        let order = self.records.ids_where(|r| ids.contains(&r.id()));
        if let Some(blocked) = order.iter().find(|id| !self.can_unload(**id)) {
            return Err(CoreError::structural(format!(
                "{blocked} has uncommitted changes and cannot be unloaded"
            )));
        }
        if order.is_empty() {
            return Ok(());
        }

        ctx.events
            .raise_event(TransactionEvent::ObjectsUnloading { ids: order.clone() })?;
        for id in &order {
            self.remove_record(*id)?;
        }
        debug!(transaction = %self.transaction, count = order.len(), "unloaded objects");
        let mut reversed = order;
        reversed.reverse();
        ctx.events
            .raise_event(TransactionEvent::ObjectsUnloaded { ids: reversed })
    }

    /// Unloads every object without changes and returns their IDs.
    pub(crate) fn unload_all(&mut self, ctx: &mut OperationContext<'_>) -> CoreResult<Vec<EntityId>> {
        let candidates: Vec<EntityId> = self
            .records
            .ids_where(|_| true)
            .into_iter()
            .filter(|id| self.can_unload(*id))
            .collect();
        self.unload(ctx, &candidates)?;
        Ok(candidates)
    }

    /// Drops the loaded data of a virtual endpoint so the next access reloads it.
    pub(crate) fn unload_relation(
        &mut self,
        ctx: &mut OperationContext<'_>,
        endpoint_id: RelationEndpointId,
    ) -> CoreResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.require_endpoint(endpoint_id.definition())?;
        if definition.is_real() {
            return Err(CoreError::structural(format!(
                "real endpoint {endpoint_id} cannot be unloaded on its own"
            )));
        }
        let Some(endpoint) = self.endpoints.get(&endpoint_id) else {
            return Ok(());
        };
        if !endpoint.is_data_complete() {
            return Ok(());
        }
        if endpoint.has_been_touched() || endpoint.has_changed(&self.records) {
            return Err(CoreError::structural(format!(
                "endpoint {endpoint_id} has uncommitted changes and cannot be unloaded"
            )));
        }

        ctx.events
            .raise_event(TransactionEvent::RelationDataUnloading { endpoint: endpoint_id })?;
        let agent = RegistrationAgent::new(metadata.as_ref(), self.config.collect_unused_endpoints);
        agent.release_virtual(&mut self.endpoints, endpoint_id, definition)?;
        ctx.events
            .raise_event(TransactionEvent::RelationDataUnloaded { endpoint: endpoint_id })
    }
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataManager")
            .field("transaction", &self.transaction)
            .field("records", &self.records.len())
            .field("endpoints", &self.endpoints.len())
            .field("invalid", &self.invalid.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::loader::{RecordLoader, StoreLoader};
    use crate::event::{EventKind, RecordingSink};
    use crate::mapping::{MappingBuilder, MappingConfiguration, RelationOptions};
    use crate::persistence::InMemoryStore;
    use crate::types::EndpointDefId;
    use crate::value::ValueKind;

    pub(crate) struct Shop {
        pub(crate) metadata: Arc<MappingConfiguration>,
        pub(crate) store: InMemoryStore,
        pub(crate) customer: ClassId,
        pub(crate) order: ClassId,
        pub(crate) orders: EndpointDefId,
        pub(crate) order_customer: EndpointDefId,
        pub(crate) ada: EntityId,
        pub(crate) bob: EntityId,
        pub(crate) first: EntityId,
        pub(crate) second: EntityId,
    }

    /// Two customers; Ada has two orders, Bob none.
    pub(crate) fn shop() -> Shop {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").unwrap();
        let order = builder.add_class("Order").unwrap();
        builder.add_property(customer, "name", ValueKind::Text, false).unwrap();
        builder.add_property(order, "number", ValueKind::Int, false).unwrap();
        let relation = builder
            .add_one_to_many(order, "customer", customer, "orders", RelationOptions::new())
            .unwrap();
        let metadata = Arc::new(builder.build());
        let store = InMemoryStore::new(metadata.clone());

        let ada = EntityId::new(customer);
        let bob = EntityId::new(customer);
        store.insert(ada, vec![Value::text("Ada")]).unwrap();
        store.insert(bob, vec![Value::text("Bob")]).unwrap();
        let first = EntityId::new(order);
        let second = EntityId::new(order);
        store.insert(first, vec![Value::Int(1), Value::Reference(ada)]).unwrap();
        store.insert(second, vec![Value::Int(2), Value::Reference(ada)]).unwrap();

        Shop {
            metadata,
            store,
            customer,
            order,
            orders: relation.virtual_end.unwrap(),
            order_customer: relation.real,
            ada,
            bob,
            first,
            second,
        }
    }

    pub(crate) fn manager(shop: &Shop) -> DataManager {
        DataManager::new(
            TransactionId::new(1),
            shop.metadata.clone(),
            Config::default(),
            HashSet::new(),
        )
    }

    fn with_ctx<T>(
        shop: &Shop,
        sink: &mut RecordingSink,
        f: impl FnOnce(&mut OperationContext<'_>) -> T,
    ) -> T {
        let mut loader = StoreLoader::new(&shop.store);
        let mut ctx = OperationContext::new(&mut loader as &mut dyn RecordLoader, sink);
        f(&mut ctx)
    }

    #[test]
    fn load_raises_events_around_registration() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        with_ctx(&shop, &mut sink, |ctx| data.get_or_load(ctx, shop.ada).map(|_| ())).unwrap();

        assert_eq!(
            sink.kinds(),
            vec![
                EventKind::ObjectsLoading,
                EventKind::RecordRegistering,
                EventKind::ObjectsLoaded
            ]
        );
        assert_eq!(data.state_of(shop.ada), RecordState::Unchanged);
    }

    #[test]
    fn missing_object_leaves_no_placeholder() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();
        let ghost = EntityId::new(shop.customer);

        let result = with_ctx(&shop, &mut sink, |ctx| data.try_get_or_load(ctx, ghost).map(|r| r.is_some()));

        assert_eq!(result, Ok(false));
        assert!(!data.records().contains(&ghost));
        assert_eq!(sink.kinds().last(), Some(&EventKind::ObjectsNotFound));
    }

    #[test]
    fn invalid_object_is_never_loaded() {
        let shop = shop();
        let mut data = manager(&shop);
        data.mark_invalid(shop.ada);
        let mut sink = RecordingSink::default();

        let result = with_ctx(&shop, &mut sink, |ctx| data.ensure_loaded(ctx, shop.ada));

        assert_eq!(result, Err(CoreError::ObjectInvalid { id: shop.ada }));
        assert_eq!(shop.store.stats().record_loads(), 0);
    }

    #[test]
    fn loaded_order_registers_against_incomplete_collection() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        with_ctx(&shop, &mut sink, |ctx| data.ensure_loaded(ctx, shop.first)).unwrap();

        let orders = data.endpoint(RelationEndpointId::new(shop.ada, shop.orders)).unwrap();
        assert!(!orders.is_data_complete());
        assert_eq!(shop.store.stats().related_loads(), 0);
    }

    #[test]
    fn set_value_tracks_original() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        with_ctx(&shop, &mut sink, |ctx| {
            data.set_value(ctx, shop.ada, "name", Value::text("Ada L."))
        })
        .unwrap();

        let record = data.record(shop.ada).unwrap();
        assert_eq!(record.state(), RecordState::Changed);
        assert_eq!(record.original_value(0), &Value::text("Ada"));
        assert!(sink.kinds().ends_with(&[
            EventKind::PropertyValueChanging,
            EventKind::PropertyValueChanged
        ]));
    }

    #[test]
    fn set_value_checks_kind() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();
        with_ctx(&shop, &mut sink, |ctx| data.ensure_loaded(ctx, shop.ada)).unwrap();

        let result = with_ctx(&shop, &mut sink, |ctx| data.set_value(ctx, shop.ada, "name", Value::Int(4)));

        assert!(matches!(result, Err(CoreError::StructuralMisuse { .. })));
        let record = data.record(shop.ada).unwrap();
        assert_eq!(record.state(), RecordState::Unchanged);
        assert!(!record.has_been_touched());
        assert_eq!(record.value(0), &Value::text("Ada"));
    }

    #[test]
    fn vetoed_change_keeps_value() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::vetoing(EventKind::PropertyValueChanging);

        let result = with_ctx(&shop, &mut sink, |ctx| {
            data.set_value(ctx, shop.ada, "name", Value::text("Eve"))
        });

        assert!(matches!(result, Err(CoreError::Vetoed { .. })));
        assert_eq!(data.record(shop.ada).unwrap().value(0), &Value::text("Ada"));
    }

    #[test]
    fn new_object_starts_with_complete_endpoints() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        let id = with_ctx(&shop, &mut sink, |ctx| data.new_object(ctx, shop.customer)).unwrap();

        assert_eq!(data.state_of(id), RecordState::New);
        let orders = data.endpoint(RelationEndpointId::new(id, shop.orders)).unwrap();
        assert!(orders.is_data_complete());
        assert_eq!(
            sink.kinds(),
            vec![EventKind::NewObjectCreating, EventKind::RecordRegistering]
        );
    }

    #[test]
    fn unload_rejects_changed_objects() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        let result = with_ctx(&shop, &mut sink, |ctx| {
            data.ensure_loaded(ctx, shop.bob)?;
            data.set_value(ctx, shop.ada, "name", Value::text("Ann"))?;
            data.unload(ctx, &[shop.bob, shop.ada])
        });

        assert!(matches!(result, Err(CoreError::StructuralMisuse { .. })));
        assert!(data.records().contains(&shop.bob));
    }

    #[test]
    fn unload_orders_events() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        with_ctx(&shop, &mut sink, |ctx| {
            data.ensure_loaded(ctx, shop.ada)?;
            data.ensure_loaded(ctx, shop.bob)?;
            data.unload(ctx, &[shop.bob, shop.ada])
        })
        .unwrap();

        let unloading = sink.events.iter().find_map(|e| match e {
            TransactionEvent::ObjectsUnloading { ids } => Some(ids.clone()),
            _ => None,
        });
        let unloaded = sink.events.iter().find_map(|e| match e {
            TransactionEvent::ObjectsUnloaded { ids } => Some(ids.clone()),
            _ => None,
        });
        assert_eq!(unloading, Some(vec![shop.ada, shop.bob]));
        assert_eq!(unloaded, Some(vec![shop.bob, shop.ada]));
        assert!(data.records().is_empty());
    }

    #[test]
    fn unloading_order_collects_its_registration() {
        let shop = shop();
        let mut data = manager(&shop);
        let mut sink = RecordingSink::default();

        with_ctx(&shop, &mut sink, |ctx| {
            data.ensure_loaded(ctx, shop.first)?;
            data.unload(ctx, &[shop.first])
        })
        .unwrap();

        assert!(data.endpoints().is_empty());
    }
}
