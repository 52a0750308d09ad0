//! Record loaders and the context data operations run in.

use crate::entity::{EntityId, EntityStateRecord};
use crate::error::CoreResult;
use crate::event::EventSink;
use crate::persistence::PersistenceStrategy;
use crate::relation::RelationEndpointId;
use crate::types::{ClassId, Timestamp};
use tracing::debug;

/// Source of records for one transaction.
///
/// A root transaction reads from its [`PersistenceStrategy`]; a
/// sub-transaction reads copies of its parent's records.
pub trait RecordLoader {
    /// Loads one record, `None` if the entity does not exist.
    fn load_record(&mut self, id: EntityId) -> CoreResult<Option<EntityStateRecord>>;

    /// Loads the record related through a single-valued virtual endpoint.
    fn load_related_record(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Option<EntityStateRecord>>;

    /// Loads the records related through a collection endpoint.
    fn load_related_records(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Vec<EntityStateRecord>>;

    /// Allocates the ID of a new entity.
    fn new_id(&mut self, class: ClassId) -> CoreResult<EntityId>;

    /// Returns the timestamp the source currently holds for `id`.
    fn current_timestamp(&mut self, id: EntityId) -> CoreResult<Option<Timestamp>>;
}

/// Loads straight from the persistence strategy.
pub(crate) struct StoreLoader<'a> {
    store: &'a dyn PersistenceStrategy,
}

impl<'a> StoreLoader<'a> {
    pub(crate) fn new(store: &'a dyn PersistenceStrategy) -> Self {
        Self { store }
    }
}

impl RecordLoader for StoreLoader<'_> {
    fn load_record(&mut self, id: EntityId) -> CoreResult<Option<EntityStateRecord>> {
        debug!(entity = %id, "loading record from store");
        self.store.load_record(id)
    }

    fn load_related_record(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Option<EntityStateRecord>> {
        debug!(endpoint = %endpoint, "loading related record from store");
        self.store.load_related_record(endpoint)
    }

    fn load_related_records(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Vec<EntityStateRecord>> {
        debug!(endpoint = %endpoint, "loading related records from store");
        self.store.load_related_records(endpoint)
    }

    fn new_id(&mut self, class: ClassId) -> CoreResult<EntityId> {
        self.store.new_id(class)
    }

    fn current_timestamp(&mut self, id: EntityId) -> CoreResult<Option<Timestamp>> {
        self.store.current_timestamp(id)
    }
}

/// Collaborators of a single data operation: where records come from and
/// where events go.
pub(crate) struct OperationContext<'a> {
    pub(crate) loader: &'a mut dyn RecordLoader,
    pub(crate) events: &'a mut dyn EventSink,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(loader: &'a mut dyn RecordLoader, events: &'a mut dyn EventSink) -> Self {
        Self { loader, events }
    }
}
