//! Application-facing handle to one transaction of a hierarchy.

use crate::data::DataManager;
use crate::entity::{EntityId, EntityStateRecord, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::EventBroker;
use crate::relation::{LoadPolicy, RelationEndpoint, RelationEndpointId, SyncState};
use crate::transaction::hierarchy::TransactionHierarchy;
use crate::transaction::node::TransactionKind;
use crate::types::{ClassId, TransactionId};
use crate::value::Value;

/// A transaction of a [`TransactionHierarchy`].
///
/// The handle borrows the hierarchy mutably, so only one transaction is
/// worked with at a time. Every call checks that the transaction still
/// exists; a handle to a discarded transaction fails with
/// [`CoreError::TransactionDiscarded`].
///
/// ## Example
///
/// ```rust,ignore
/// let mut root = hierarchy.root();
/// let order = root.new_entity(order_class)?;
/// root.set_value(order, "number", 7)?;
/// root.add_related(customer, "orders", order)?;
/// root.commit()?;
/// ```
pub struct Transaction<'h> {
    hierarchy: &'h mut TransactionHierarchy,
    id: TransactionId,
}

impl<'h> Transaction<'h> {
    pub(crate) fn new(hierarchy: &'h mut TransactionHierarchy, id: TransactionId) -> Self {
        Self { hierarchy, id }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the transaction kind.
    pub fn kind(&self) -> CoreResult<TransactionKind> {
        self.hierarchy.kind(self.id)
    }

    /// Returns true if the transaction accepts mutations.
    pub fn is_active(&self) -> CoreResult<bool> {
        self.hierarchy.is_active(self.id)
    }

    /// Returns the transaction's data for inspection.
    pub fn data(&self) -> CoreResult<&DataManager> {
        self.hierarchy.data(self.id)
    }

    /// Returns the event broker, for subscribing handlers.
    pub fn events(&mut self) -> CoreResult<&mut EventBroker> {
        self.hierarchy.events(self.id)
    }

    /// Returns the record of `id`, loading it if needed.
    ///
    /// Repeated calls return the same record without loading again.
    pub fn get_or_load(&mut self, id: EntityId) -> CoreResult<&EntityStateRecord> {
        if !self.hierarchy.run(self.id, |data, ctx| data.ensure_loaded(ctx, id))? {
            return Err(CoreError::NotFound { id });
        }
        self.data()?.record(id).ok_or(CoreError::NotFound { id })
    }

    /// Like [`get_or_load`](Self::get_or_load), but a missing entity yields `None`.
    pub fn try_get_or_load(&mut self, id: EntityId) -> CoreResult<Option<&EntityStateRecord>> {
        if !self.hierarchy.run(self.id, |data, ctx| data.ensure_loaded(ctx, id))? {
            return Ok(None);
        }
        Ok(self.data()?.record(id))
    }

    /// Loads the data of `id` if it is not loaded yet.
    pub fn ensure_data_available(&mut self, id: EntityId) -> CoreResult<()> {
        self.get_or_load(id).map(|_| ())
    }

    /// Makes `id` known to the transaction without loading it. Returns false
    /// if it was already known.
    pub fn enlist(&mut self, id: EntityId) -> CoreResult<bool> {
        self.hierarchy.run(self.id, |data, ctx| data.enlist(ctx, id))
    }

    /// Returns the state of `id` without loading anything.
    pub fn state(&self, id: EntityId) -> CoreResult<RecordState> {
        Ok(self.data()?.state_of(id))
    }

    /// Creates a new entity of `class`.
    pub fn new_entity(&mut self, class: ClassId) -> CoreResult<EntityId> {
        self.hierarchy.run(self.id, |data, ctx| data.new_object(ctx, class))
    }

    /// Reads a scalar property.
    pub fn get_value(&mut self, id: EntityId, property: &str) -> CoreResult<Value> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_value(ctx, id, property))
    }

    /// Reads the value a scalar property had when it was loaded or last committed.
    pub fn get_original_value(&mut self, id: EntityId, property: &str) -> CoreResult<Value> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_original_value(ctx, id, property))
    }

    /// Writes a scalar property.
    pub fn set_value(
        &mut self,
        id: EntityId,
        property: &str,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let value = value.into();
        self.hierarchy
            .run(self.id, |data, ctx| data.set_value(ctx, id, property, value))
    }

    /// Forces `id` into the next commit set even if it has no changes.
    pub fn mark_changed(&mut self, id: EntityId) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| data.mark_changed(ctx, id))
    }

    /// Deletes `id`. Deleting a new object discards it.
    pub fn delete(&mut self, id: EntityId) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| data.delete(ctx, id))
    }

    /// Reads a single-valued relation property.
    pub fn get_related(&mut self, id: EntityId, property: &str) -> CoreResult<Option<EntityId>> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_related(ctx, id, property))
    }

    /// Reads the original value of a single-valued relation property.
    pub fn get_original_related(
        &mut self,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Option<EntityId>> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_original_related(ctx, id, property))
    }

    /// Sets a single-valued relation property.
    pub fn set_related(
        &mut self,
        id: EntityId,
        property: &str,
        target: Option<EntityId>,
    ) -> CoreResult<()> {
        self.hierarchy
            .run(self.id, |data, ctx| data.set_related(ctx, id, property, target))
    }

    /// Reads a collection relation property, loading it on first access.
    pub fn get_related_collection(
        &mut self,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Vec<EntityId>> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_related_collection(ctx, id, property))
    }

    /// Reads the original contents of a collection relation property.
    pub fn get_original_collection(
        &mut self,
        id: EntityId,
        property: &str,
    ) -> CoreResult<Vec<EntityId>> {
        self.hierarchy
            .run(self.id, |data, ctx| data.get_original_collection(ctx, id, property))
    }

    /// Inserts `item` into a collection at `index`.
    pub fn insert_related(
        &mut self,
        id: EntityId,
        property: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| {
            data.insert_related(ctx, id, property, index, item)
        })
    }

    /// Appends `item` to a collection.
    pub fn add_related(&mut self, id: EntityId, property: &str, item: EntityId) -> CoreResult<()> {
        self.hierarchy
            .run(self.id, |data, ctx| data.add_related(ctx, id, property, item))
    }

    /// Removes `item` from a collection.
    pub fn remove_related(
        &mut self,
        id: EntityId,
        property: &str,
        item: EntityId,
    ) -> CoreResult<()> {
        self.hierarchy
            .run(self.id, |data, ctx| data.remove_related(ctx, id, property, item))
    }

    /// Replaces the item at `index` of a collection.
    pub fn replace_related(
        &mut self,
        id: EntityId,
        property: &str,
        index: usize,
        item: EntityId,
    ) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| {
            data.replace_related(ctx, id, property, index, item)
        })
    }

    /// Replaces the whole contents of a collection.
    pub fn set_related_collection(
        &mut self,
        id: EntityId,
        property: &str,
        items: Vec<EntityId>,
    ) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| {
            data.set_related_collection(ctx, id, property, items)
        })
    }

    /// Returns relation endpoint `endpoint`, loading as much as `policy` allows.
    pub fn relation_endpoint(
        &mut self,
        endpoint: RelationEndpointId,
        policy: LoadPolicy,
    ) -> CoreResult<Option<&RelationEndpoint>> {
        self.hierarchy.run(self.id, |data, ctx| {
            data.relation_endpoint(ctx, endpoint, policy).map(|_| ())
        })?;
        Ok(self.data()?.endpoint(endpoint))
    }

    /// Returns whether a relation property agrees with its opposite side.
    pub fn relation_sync_state(&mut self, id: EntityId, property: &str) -> CoreResult<SyncState> {
        self.hierarchy
            .run(self.id, |data, ctx| data.relation_sync_state(ctx, id, property))
    }

    /// Reconciles an out-of-sync relation property with its opposite side.
    pub fn synchronize_relation(&mut self, id: EntityId, property: &str) -> CoreResult<()> {
        self.hierarchy
            .run(self.id, |data, ctx| data.synchronize_relation(ctx, id, property))
    }

    /// Unloads unchanged objects; fails without unloading anything if one
    /// of them has changes.
    pub fn unload(&mut self, ids: &[EntityId]) -> CoreResult<()> {
        self.hierarchy.run(self.id, |data, ctx| data.unload(ctx, ids))
    }

    /// Unloads every object without changes and returns their IDs.
    pub fn unload_all(&mut self) -> CoreResult<Vec<EntityId>> {
        self.hierarchy.run(self.id, |data, ctx| data.unload_all(ctx))
    }

    /// Drops the loaded data of a virtual relation endpoint.
    pub fn unload_relation(&mut self, endpoint: RelationEndpointId) -> CoreResult<()> {
        self.hierarchy
            .run(self.id, |data, ctx| data.unload_relation(ctx, endpoint))
    }

    /// Returns true if the transaction holds uncommitted changes.
    pub fn has_changes(&self) -> CoreResult<bool> {
        Ok(self.data()?.has_changes())
    }

    /// Creates a sub-transaction and returns a handle to it.
    ///
    /// This transaction stays read-only until the sub-transaction is
    /// committed or discarded.
    pub fn create_sub(&mut self) -> CoreResult<Transaction<'_>> {
        let sub = self.hierarchy.create_sub(self.id)?;
        Ok(Transaction::new(&mut *self.hierarchy, sub))
    }

    /// Commits the transaction.
    ///
    /// A root transaction writes its changes to the store. A sub-transaction
    /// merges them into its parent and is discarded afterwards.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.hierarchy.commit(self.id)
    }

    /// Reverts every uncommitted change. New objects become invalid.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.hierarchy.rollback(self.id)
    }

    /// Discards the transaction and every sub-transaction below it.
    pub fn discard(self) -> CoreResult<()> {
        self.hierarchy.discard(self.id)
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}
