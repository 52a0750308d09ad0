//! Relation reads, lazy endpoint loading and relation change planning.
//!
//! Every change is planned as a [`RelationCommand`] before anything is
//! modified. Planning loads the opposite endpoints it needs, so a change
//! either runs completely or fails without touching data.

use crate::data::loader::OperationContext;
use crate::data::manager::DataManager;
use crate::entity::{EntityId, EntityStateRecord, Lifecycle, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::TransactionEvent;
use crate::mapping::{Cardinality, EndpointDefinition};
use crate::relation::{
    LoadPolicy, Modification, RelationCommand, RelationEndpoint, RelationEndpointId, SyncState,
};
use std::sync::Arc;
use tracing::debug;

impl DataManager {
    /// Returns endpoint `id`, doing as much loading as `policy` allows.
    pub(crate) fn relation_endpoint(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: RelationEndpointId,
        policy: LoadPolicy,
    ) -> CoreResult<Option<&RelationEndpoint>> {
        if id.is_null() {
            return Ok(None);
        }
        match policy {
            LoadPolicy::WithoutLoading => {}
            LoadPolicy::MinimumLoading => self.ensure_endpoint_registered(ctx, id)?,
            LoadPolicy::WithLazyLoad => self.load_endpoint(ctx, id)?,
        }
        Ok(self.endpoints.get(&id))
    }

    /// Registers endpoint `id`. Real endpoints come with their owner's data;
    /// virtual ones start out incomplete.
    pub(crate) fn ensure_endpoint_registered(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: RelationEndpointId,
    ) -> CoreResult<()> {
        if self.endpoints.contains(&id) {
            return Ok(());
        }
        let Some(owner) = id.entity() else {
            return Err(CoreError::structural(format!("null endpoint {id} has no state")));
        };
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.require_endpoint(id.definition())?;
        if definition.class() != owner.class() {
            return Err(CoreError::structural(format!(
                "endpoint {id} does not belong to class {}",
                owner.class()
            )));
        }
        if definition.is_real() {
            let record = self.get_or_load(ctx, owner)?;
            record.ensure_usable()?;
            if !self.endpoints.contains(&id) {
                return Err(CoreError::structural(format!("endpoint {id} was not registered")));
            }
        } else {
            if self.invalid.contains(&owner) {
                return Err(CoreError::ObjectInvalid { id: owner });
            }
            self.endpoints
                .get_or_create_virtual(id, definition.cardinality())?;
        }
        Ok(())
    }

    /// Registers endpoint `id` and completes it if it is virtual. Null
    /// endpoints are ignored.
    pub(crate) fn load_endpoint(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: RelationEndpointId,
    ) -> CoreResult<()> {
        if id.is_null() {
            return Ok(());
        }
        self.ensure_endpoint_registered(ctx, id)?;
        self.ensure_endpoint_complete(ctx, id)
    }

    /// Loads the data of an incomplete virtual endpoint.
    ///
    /// Records already in memory keep their state; only records the
    /// transaction has not seen are registered. The endpoint's items are
    /// the fetched records whose in-memory original foreign key points at
    /// the owner.
    pub(crate) fn ensure_endpoint_complete(
        &mut self,
        ctx: &mut OperationContext<'_>,
        id: RelationEndpointId,
    ) -> CoreResult<()> {
        let Some(owner) = id.entity() else {
            return Ok(());
        };
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.require_endpoint(id.definition())?;
        if definition.is_real() {
            return Ok(());
        }
        let cardinality = definition.cardinality();
        if self.endpoints.get_or_create_virtual(id, cardinality)?.is_data_complete() {
            return Ok(());
        }
        let real = metadata
            .opposite_of(definition)?
            .ok_or_else(|| CoreError::mapping(format!("virtual endpoint {id} has no opposite")))?;
        let slot = foreign_key_slot(real)?;

        debug!(transaction = %self.transaction, endpoint = %id, "loading relation");
        let fetched: Vec<EntityStateRecord> = match cardinality {
            Cardinality::Many => ctx.loader.load_related_records(id)?,
            Cardinality::One => ctx.loader.load_related_record(id)?.into_iter().collect(),
        };

        let mut order = Vec::new();
        let mut fresh = Vec::new();
        for record in fetched {
            let item = record.id();
            if self.invalid.contains(&item) || order.contains(&item) {
                continue;
            }
            order.push(item);
            let known = self
                .records
                .get(&item)
                .is_some_and(|r| r.lifecycle() != Lifecycle::NotLoadedYet);
            if !known {
                fresh.push(record);
            }
        }
        if !fresh.is_empty() {
            let ids: Vec<EntityId> = fresh.iter().map(EntityStateRecord::id).collect();
            ctx.events
                .raise_event(TransactionEvent::ObjectsLoading { ids: ids.clone() })?;
            for record in fresh {
                self.register_record(ctx, record)?;
            }
            ctx.events
                .raise_event(TransactionEvent::ObjectsLoaded { ids })?;
        }

        let items: Vec<EntityId> = order
            .into_iter()
            .filter(|item| {
                self.records
                    .get(item)
                    .is_some_and(|r| r.original_value(slot).as_reference() == Some(owner))
            })
            .collect();

        // Registering a fresh record may already have seeded a single-valued endpoint.
        let endpoint = self.endpoints.get_or_create_virtual(id, cardinality)?;
        if !endpoint.is_data_complete() {
            let missing = endpoint.mark_data_complete(items.clone())?;
            for item in missing {
                self.endpoints.set_sync_state(
                    &RelationEndpointId::new(item, real.id()),
                    SyncState::Unsynchronized,
                );
            }
            for item in &items {
                self.endpoints.set_sync_state(
                    &RelationEndpointId::new(*item, real.id()),
                    SyncState::Synchronized,
                );
            }
        }
        ctx.events
            .raise_event(TransactionEvent::VirtualRelationStateUpdated {
                endpoint: id,
                has_changed: false,
            })
    }

    fn current_target(&self, owner: EntityId, slot: usize) -> Option<EntityId> {
        self.records.get(&owner).and_then(|r| r.value(slot).as_reference())
    }

    fn object_related(&self, id: RelationEndpointId) -> Option<EntityId> {
        self.endpoints
            .get(&id)
            .and_then(RelationEndpoint::as_virtual_object)
            .and_then(|e| e.related())
    }

    fn collection_items(&self, id: RelationEndpointId) -> Vec<EntityId> {
        self.endpoints
            .get(&id)
            .and_then(RelationEndpoint::as_collection)
            .map(|e| e.items().to_vec())
            .unwrap_or_default()
    }

    /// Fails if the real endpoint `id` disagrees with its opposite.
    fn check_real_sync(&self, id: RelationEndpointId, property: &str) -> CoreResult<()> {
        let out_of_sync = self
            .endpoints
            .get(&id)
            .and_then(RelationEndpoint::as_real)
            .is_some_and(|e| e.sync_state() == SyncState::Unsynchronized);
        match (out_of_sync, id.entity()) {
            (true, Some(owner)) => Err(CoreError::out_of_sync(owner, property)),
            _ => Ok(()),
        }
    }

    /// Fails if the virtual endpoint `id` has unsynchronized opposites.
    fn check_virtual_sync(&self, id: RelationEndpointId, property: &str) -> CoreResult<()> {
        let out_of_sync = self
            .endpoints
            .get(&id)
            .is_some_and(|e| !e.unsynchronized_opposites().is_empty());
        match (out_of_sync, id.entity()) {
            (true, Some(owner)) => Err(CoreError::out_of_sync(owner, property)),
            _ => Ok(()),
        }
    }

    /// Loads `target` and checks it may be related through `definition`.
    fn check_target(
        &mut self,
        ctx: &mut OperationContext<'_>,
        definition: &EndpointDefinition,
        target: EntityId,
    ) -> CoreResult<()> {
        if target.class() != definition.target() {
            return Err(CoreError::structural(format!(
                "'{}' expects class {}, got {target}",
                definition.property(),
                definition.target()
            )));
        }
        self.usable_record(ctx, target)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut OperationContext<'_>, command: &RelationCommand) -> CoreResult<()> {
        if command.is_empty() {
            return Ok(());
        }
        command.execute(&mut self.records, &mut self.endpoints, &mut *ctx.events)
    }

    /// Reads a single-valued relation property.
    pub(crate) fn get_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<Option<EntityId>> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        if definition.cardinality() == Cardinality::Many {
            return Err(CoreError::structural(format!("'{property}' is a collection")));
        }
        self.usable_record(ctx, owner)?;
        if let Some(slot) = definition.foreign_key_slot() {
            return Ok(self.current_target(owner, slot));
        }
        let id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, id)?;
        Ok(self.object_related(id))
    }

    /// Returns the original value of a single-valued relation property.
    pub(crate) fn get_original_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<Option<EntityId>> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        if definition.cardinality() == Cardinality::Many {
            return Err(CoreError::structural(format!("'{property}' is a collection")));
        }
        let id = RelationEndpointId::new(owner, definition.id());
        self.usable_record(ctx, owner)?;
        self.load_endpoint(ctx, id)?;
        let endpoint = self
            .endpoints
            .get(&id)
            .ok_or_else(|| CoreError::structural(format!("endpoint {id} is not registered")))?;
        Ok(endpoint.original_ids(&self.records).first().copied())
    }

    /// Reads a collection relation property.
    pub(crate) fn get_related_collection(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<Vec<EntityId>> {
        let id = self.collection_endpoint(ctx, owner, property)?;
        Ok(self.collection_items(id))
    }

    /// Returns the original contents of a collection relation property.
    pub(crate) fn get_original_collection(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<Vec<EntityId>> {
        let id = self.collection_endpoint(ctx, owner, property)?;
        Ok(self
            .endpoints
            .get(&id)
            .and_then(RelationEndpoint::as_collection)
            .map(|e| e.original().as_slice().to_vec())
            .unwrap_or_default())
    }

    fn collection_endpoint(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<RelationEndpointId> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        if definition.cardinality() != Cardinality::Many {
            return Err(CoreError::structural(format!("'{property}' is not a collection")));
        }
        self.usable_record(ctx, owner)?;
        let id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, id)?;
        Ok(id)
    }

    /// Sets a single-valued relation property, updating every affected endpoint.
    pub(crate) fn set_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        target: Option<EntityId>,
    ) -> CoreResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        if definition.cardinality() == Cardinality::Many {
            return Err(CoreError::structural(format!(
                "'{property}' is a collection; use the collection operations"
            )));
        }
        self.usable_record(ctx, owner)?;
        if let Some(target) = target {
            self.check_target(ctx, definition, target)?;
        }
        let command = if definition.is_real() {
            self.plan_set_real(ctx, owner, definition, target)?
        } else {
            self.plan_set_virtual_object(ctx, owner, definition, target)?
        };
        self.execute(ctx, &command)
    }

    fn plan_set_real(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        definition: &EndpointDefinition,
        new: Option<EntityId>,
    ) -> CoreResult<RelationCommand> {
        let metadata = Arc::clone(&self.metadata);
        let endpoint_id = RelationEndpointId::new(owner, definition.id());
        self.ensure_endpoint_registered(ctx, endpoint_id)?;
        self.check_real_sync(endpoint_id, definition.property())?;
        let slot = foreign_key_slot(definition)?;
        let old = self.current_target(owner, slot);

        let mut command = RelationCommand::new();
        if old == new {
            return Ok(command);
        }
        command.push(Modification::SetReal {
            endpoint: endpoint_id,
            slot,
            old,
            new,
        });
        let Some(opposite) = metadata.opposite_of(definition)? else {
            return Ok(command);
        };

        let old_opposite = RelationEndpointId::for_entity(old, opposite.id());
        let new_opposite = RelationEndpointId::for_entity(new, opposite.id());
        self.load_endpoint(ctx, old_opposite)?;
        self.load_endpoint(ctx, new_opposite)?;

        match opposite.cardinality() {
            Cardinality::One => {
                command.push(Modification::SetObject {
                    endpoint: old_opposite,
                    old: Some(owner),
                    new: None,
                });
                if new.is_some() {
                    let previous = self.object_related(new_opposite);
                    command.push(Modification::SetObject {
                        endpoint: new_opposite,
                        old: previous,
                        new: Some(owner),
                    });
                    if let Some(previous) = previous.filter(|p| *p != owner) {
                        let previous_real = RelationEndpointId::new(previous, definition.id());
                        self.ensure_endpoint_registered(ctx, previous_real)?;
                        self.check_real_sync(previous_real, definition.property())?;
                        command.push(Modification::SetReal {
                            endpoint: previous_real,
                            slot,
                            old: new,
                            new: None,
                        });
                    }
                }
            }
            Cardinality::Many => {
                if old.is_some() {
                    command.push(Modification::Remove {
                        endpoint: old_opposite,
                        item: owner,
                    });
                }
                if new.is_some() {
                    command.push(Modification::Insert {
                        endpoint: new_opposite,
                        index: self.collection_items(new_opposite).len(),
                        item: owner,
                    });
                }
            }
        }
        Ok(command)
    }

    fn plan_set_virtual_object(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        definition: &EndpointDefinition,
        new: Option<EntityId>,
    ) -> CoreResult<RelationCommand> {
        let metadata = Arc::clone(&self.metadata);
        let endpoint_id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, endpoint_id)?;
        self.check_virtual_sync(endpoint_id, definition.property())?;
        let old = self.object_related(endpoint_id);

        let mut command = RelationCommand::new();
        if old == new {
            return Ok(command);
        }
        let real = metadata.opposite_of(definition)?.ok_or_else(|| {
            CoreError::mapping(format!("virtual endpoint {endpoint_id} has no opposite"))
        })?;
        let slot = foreign_key_slot(real)?;

        command.push(Modification::SetObject {
            endpoint: endpoint_id,
            old,
            new,
        });
        if let Some(old) = old {
            let old_real = RelationEndpointId::new(old, real.id());
            self.ensure_endpoint_registered(ctx, old_real)?;
            self.check_real_sync(old_real, real.property())?;
            command.push(Modification::SetReal {
                endpoint: old_real,
                slot,
                old: Some(owner),
                new: None,
            });
        }
        if let Some(new) = new {
            let new_real = RelationEndpointId::new(new, real.id());
            self.ensure_endpoint_registered(ctx, new_real)?;
            self.check_real_sync(new_real, real.property())?;
            let previous = self.current_target(new, slot);
            command.push(Modification::SetReal {
                endpoint: new_real,
                slot,
                old: previous,
                new: Some(owner),
            });
            if let Some(previous) = previous.filter(|p| *p != owner) {
                let previous_virtual = RelationEndpointId::new(previous, definition.id());
                self.load_endpoint(ctx, previous_virtual)?;
                command.push(Modification::SetObject {
                    endpoint: previous_virtual,
                    old: Some(new),
                    new: None,
                });
            }
        }
        Ok(command)
    }

    /// Resolves a collection property and makes sure it can be changed.
    fn prepare_collection_change(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<(RelationEndpointId, EndpointDefinition, EndpointDefinition)> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        if definition.cardinality() != Cardinality::Many {
            return Err(CoreError::structural(format!("'{property}' is not a collection")));
        }
        let real = metadata.opposite_of(definition)?.ok_or_else(|| {
            CoreError::mapping(format!("collection '{property}' has no opposite"))
        })?;
        self.usable_record(ctx, owner)?;
        let id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, id)?;
        self.check_virtual_sync(id, property)?;
        Ok((id, definition.clone(), real.clone()))
    }

    /// Plans moving `item` into `owner`'s collection: its foreign key and
    /// the collection it currently belongs to.
    fn plan_adopt_item(
        &mut self,
        ctx: &mut OperationContext<'_>,
        command: &mut RelationCommand,
        owner: EntityId,
        definition: &EndpointDefinition,
        real: &EndpointDefinition,
        item: EntityId,
    ) -> CoreResult<()> {
        let slot = foreign_key_slot(real)?;
        let item_real = RelationEndpointId::new(item, real.id());
        self.ensure_endpoint_registered(ctx, item_real)?;
        self.check_real_sync(item_real, real.property())?;
        let previous = self.current_target(item, slot);
        command.push(Modification::SetReal {
            endpoint: item_real,
            slot,
            old: previous,
            new: Some(owner),
        });
        if let Some(previous) = previous.filter(|p| *p != owner) {
            let previous_collection = RelationEndpointId::new(previous, definition.id());
            self.load_endpoint(ctx, previous_collection)?;
            command.push(Modification::Remove {
                endpoint: previous_collection,
                item,
            });
        }
        Ok(())
    }

    fn plan_release_item(
        &mut self,
        ctx: &mut OperationContext<'_>,
        command: &mut RelationCommand,
        owner: EntityId,
        real: &EndpointDefinition,
        item: EntityId,
    ) -> CoreResult<()> {
        let slot = foreign_key_slot(real)?;
        let item_real = RelationEndpointId::new(item, real.id());
        self.ensure_endpoint_registered(ctx, item_real)?;
        self.check_real_sync(item_real, real.property())?;
        command.push(Modification::SetReal {
            endpoint: item_real,
            slot,
            old: Some(owner),
            new: None,
        });
        Ok(())
    }

    /// Inserts `item` at `index` of a collection.
    pub(crate) fn insert_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        let (id, definition, real) = self.prepare_collection_change(ctx, owner, property)?;
        self.check_target(ctx, &definition, item)?;
        let items = self.collection_items(id);
        if items.contains(&item) {
            return Err(CoreError::structural(format!(
                "{owner}.{property} already contains {item}"
            )));
        }
        if index > items.len() {
            return Err(CoreError::structural(format!(
                "index {index} is out of bounds for {owner}.{property} of length {}",
                items.len()
            )));
        }
        let mut command = RelationCommand::new();
        command.push(Modification::Insert {
            endpoint: id,
            index,
            item,
        });
        self.plan_adopt_item(ctx, &mut command, owner, &definition, &real, item)?;
        self.execute(ctx, &command)
    }

    /// Appends `item` to a collection.
    pub(crate) fn add_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        item: EntityId,
    ) -> CoreResult<()> {
        let id = self.collection_endpoint(ctx, owner, property)?;
        let index = self.collection_items(id).len();
        self.insert_related(ctx, owner, property, index, item)
    }

    /// Removes `item` from a collection and clears its foreign key.
    pub(crate) fn remove_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        item: EntityId,
    ) -> CoreResult<()> {
        let (id, _, real) = self.prepare_collection_change(ctx, owner, property)?;
        if !self.collection_items(id).contains(&item) {
            return Err(CoreError::structural(format!(
                "{owner}.{property} does not contain {item}"
            )));
        }
        let mut command = RelationCommand::new();
        command.push(Modification::Remove { endpoint: id, item });
        self.plan_release_item(ctx, &mut command, owner, &real, item)?;
        self.execute(ctx, &command)
    }

    /// Replaces the item at `index` of a collection.
    pub(crate) fn replace_related(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        let (id, definition, real) = self.prepare_collection_change(ctx, owner, property)?;
        let items = self.collection_items(id);
        let Some(old) = items.get(index).copied() else {
            return Err(CoreError::structural(format!(
                "index {index} is out of bounds for {owner}.{property} of length {}",
                items.len()
            )));
        };
        if old == item {
            return Ok(());
        }
        if items.contains(&item) {
            return Err(CoreError::structural(format!(
                "{owner}.{property} already contains {item}"
            )));
        }
        self.check_target(ctx, &definition, item)?;

        let mut command = RelationCommand::new();
        command.push(Modification::Replace {
            endpoint: id,
            index,
            old,
            new: item,
        });
        self.plan_release_item(ctx, &mut command, owner, &real, old)?;
        self.plan_adopt_item(ctx, &mut command, owner, &definition, &real, item)?;
        self.execute(ctx, &command)
    }

    /// Replaces the whole contents of a collection.
    pub(crate) fn set_related_collection(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
        new_items: Vec<EntityId>,
    ) -> CoreResult<()> {
        for (i, item) in new_items.iter().enumerate() {
            if new_items[..i].contains(item) {
                return Err(CoreError::structural(format!(
                    "{item} appears twice in the new contents of {owner}.{property}"
                )));
            }
        }
        let (id, definition, real) = self.prepare_collection_change(ctx, owner, property)?;
        for item in &new_items {
            self.check_target(ctx, &definition, *item)?;
        }
        let old_items = self.collection_items(id);
        if old_items == new_items {
            return Ok(());
        }

        let mut command = RelationCommand::new();
        command.push(Modification::SetAll {
            endpoint: id,
            old: old_items.clone(),
            new: new_items.clone(),
        });
        for removed in old_items.iter().filter(|i| !new_items.contains(i)) {
            self.plan_release_item(ctx, &mut command, owner, &real, *removed)?;
        }
        for added in new_items.iter().filter(|i| !old_items.contains(i)) {
            self.plan_adopt_item(ctx, &mut command, owner, &definition, &real, *added)?;
        }
        self.execute(ctx, &command)
    }

    /// Deletes `id`, clearing every relation it takes part in.
    ///
    /// Deleting a new object discards it: it becomes invalid instead of
    /// deleted. Deleting an already deleted object does nothing.
    pub(crate) fn delete(&mut self, ctx: &mut OperationContext<'_>, id: EntityId) -> CoreResult<()> {
        let state = self.get_or_load(ctx, id)?.state();
        match state {
            RecordState::Deleted => return Ok(()),
            RecordState::Invalid => return Err(CoreError::ObjectInvalid { id }),
            _ => {}
        }

        ctx.events
            .raise_event(TransactionEvent::ObjectDeleting { id })?;
        let command = self.plan_delete(ctx, id)?;
        self.execute(ctx, &command)?;

        if state == RecordState::New {
            ctx.events
                .raise_event(TransactionEvent::RecordUnregistering { id })?;
            self.discard_new(id)?;
        } else {
            self.records
                .get_mut(&id)
                .ok_or(CoreError::NotFound { id })?
                .mark_deleted()?;
        }
        debug!(transaction = %self.transaction, entity = %id, "deleted object");
        ctx.events
            .raise_event(TransactionEvent::ObjectDeleted { id })
    }

    fn plan_delete(&mut self, ctx: &mut OperationContext<'_>, id: EntityId) -> CoreResult<RelationCommand> {
        let metadata = Arc::clone(&self.metadata);
        let class = metadata.require_class(id.class())?;
        let mut command = RelationCommand::new();

        for def_id in class.endpoints() {
            let definition = metadata.require_endpoint(*def_id)?;
            let endpoint_id = RelationEndpointId::new(id, *def_id);

            if let Some(slot) = definition.foreign_key_slot() {
                let Some(target) = self.current_target(id, slot) else {
                    continue;
                };
                command.push(Modification::SetReal {
                    endpoint: endpoint_id,
                    slot,
                    old: Some(target),
                    new: None,
                });
                if let Some(opposite) = metadata.opposite_of(definition)? {
                    let opposite_id = RelationEndpointId::new(target, opposite.id());
                    self.load_endpoint(ctx, opposite_id)?;
                    command.push(match opposite.cardinality() {
                        Cardinality::One => Modification::SetObject {
                            endpoint: opposite_id,
                            old: Some(id),
                            new: None,
                        },
                        Cardinality::Many => Modification::Remove {
                            endpoint: opposite_id,
                            item: id,
                        },
                    });
                }
                continue;
            }

            self.load_endpoint(ctx, endpoint_id)?;
            let real = metadata.opposite_of(definition)?.ok_or_else(|| {
                CoreError::mapping(format!("virtual endpoint {endpoint_id} has no opposite"))
            })?;
            let slot = foreign_key_slot(real)?;
            let related = match definition.cardinality() {
                Cardinality::One => {
                    let related = self.object_related(endpoint_id);
                    if related.is_some() {
                        command.push(Modification::SetObject {
                            endpoint: endpoint_id,
                            old: related,
                            new: None,
                        });
                    }
                    related.into_iter().collect()
                }
                Cardinality::Many => {
                    let items = self.collection_items(endpoint_id);
                    if !items.is_empty() {
                        command.push(Modification::SetAll {
                            endpoint: endpoint_id,
                            old: items.clone(),
                            new: Vec::new(),
                        });
                    }
                    items
                }
            };
            for item in related {
                let item_real = RelationEndpointId::new(item, real.id());
                self.ensure_endpoint_registered(ctx, item_real)?;
                command.push(Modification::SetReal {
                    endpoint: item_real,
                    slot,
                    old: Some(id),
                    new: None,
                });
            }
        }
        Ok(command)
    }

    /// Returns the sync state of a relation property.
    pub(crate) fn relation_sync_state(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<SyncState> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        let id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, id)?;
        let endpoint = self
            .endpoints
            .get(&id)
            .ok_or_else(|| CoreError::structural(format!("endpoint {id} is not registered")))?;
        Ok(match endpoint {
            RelationEndpoint::Real(real) => real.sync_state(),
            virtual_endpoint if virtual_endpoint.unsynchronized_opposites().is_empty() => {
                SyncState::Synchronized
            }
            _ => SyncState::Unsynchronized,
        })
    }

    /// Brings an out-of-sync relation property back in line with its
    /// opposite side by taking the foreign keys as the truth.
    pub(crate) fn synchronize_relation(
        &mut self,
        ctx: &mut OperationContext<'_>,
        owner: EntityId,
        property: &str,
    ) -> CoreResult<()> {
        let metadata = Arc::clone(&self.metadata);
        let definition = metadata.endpoint_by_property(owner.class(), property)?;
        let id = RelationEndpointId::new(owner, definition.id());
        self.load_endpoint(ctx, id)?;

        if let Some(slot) = definition.foreign_key_slot() {
            let in_sync = self
                .endpoints
                .get(&id)
                .and_then(RelationEndpoint::as_real)
                .is_some_and(|e| e.sync_state() != SyncState::Unsynchronized);
            let Some(opposite) = metadata.opposite_of(definition)? else {
                return Ok(());
            };
            if in_sync {
                return Ok(());
            }
            let target = self
                .records
                .get(&owner)
                .and_then(|r| r.original_value(slot).as_reference());
            let opposite_id = RelationEndpointId::for_entity(target, opposite.id());
            self.load_endpoint(ctx, opposite_id)?;
            let displaced = match self.endpoints.get_mut(&opposite_id) {
                Some(endpoint) => endpoint.synchronize_opposite(owner)?,
                None => None,
            };
            self.endpoints.set_sync_state(&id, SyncState::Synchronized);
            if let Some(displaced) = displaced {
                self.endpoints.set_sync_state(
                    &RelationEndpointId::new(displaced, definition.id()),
                    SyncState::Unsynchronized,
                );
            }
            return Ok(());
        }

        let real = metadata.opposite_of(definition)?.ok_or_else(|| {
            CoreError::mapping(format!("virtual endpoint {id} has no opposite"))
        })?;
        let pending = self
            .endpoints
            .get(&id)
            .map(RelationEndpoint::unsynchronized_opposites)
            .unwrap_or_default();
        for item in pending {
            let displaced = match self.endpoints.get_mut(&id) {
                Some(endpoint) => endpoint.synchronize_opposite(item)?,
                None => None,
            };
            self.endpoints
                .set_sync_state(&RelationEndpointId::new(item, real.id()), SyncState::Synchronized);
            if let Some(displaced) = displaced {
                self.endpoints.set_sync_state(
                    &RelationEndpointId::new(displaced, real.id()),
                    SyncState::Unsynchronized,
                );
            }
        }
        Ok(())
    }
}

fn foreign_key_slot(definition: &EndpointDefinition) -> CoreResult<usize> {
    definition.foreign_key_slot().ok_or_else(|| {
        CoreError::mapping(format!(
            "endpoint '{}' has no foreign key slot",
            definition.property()
        ))
    })
}
