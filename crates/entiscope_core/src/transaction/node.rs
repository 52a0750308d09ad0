//! One transaction of a hierarchy and the loader chain through its ancestors.

use crate::data::{DataManager, OperationContext, RecordLoader, StoreLoader};
use crate::entity::{EntityId, EntityStateRecord, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::{EventBroker, EventSink, TransactionEvent};
use crate::persistence::PersistenceStrategy;
use crate::relation::{LoadPolicy, RelationEndpointId};
use crate::transaction::lock::TransactionLock;
use crate::types::{ClassId, Timestamp, TransactionId};

/// The kind of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Top-level transaction persisting through the store.
    Root,
    /// Nested transaction merging into its parent on commit.
    Sub,
    /// Root transaction whose entities are bound to it for good. Cannot
    /// create sub-transactions.
    Binding,
}

/// State of one transaction in a hierarchy.
pub(crate) struct TransactionNode {
    pub(crate) id: TransactionId,
    pub(crate) kind: TransactionKind,
    pub(crate) lock: TransactionLock,
    pub(crate) data: DataManager,
    pub(crate) broker: EventBroker,
}

impl TransactionNode {
    pub(crate) fn new(kind: TransactionKind, data: DataManager, broker: EventBroker) -> Self {
        Self {
            id: data.transaction(),
            kind,
            lock: TransactionLock::new(true),
            data,
            broker,
        }
    }

    /// Runs `f` against this node's data with events routed into its broker.
    pub(crate) fn operate<T>(
        &mut self,
        loader: &mut dyn RecordLoader,
        f: impl FnOnce(&mut DataManager, &mut OperationContext<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut sink = self.broker.sink(&self.lock);
        let mut ctx = OperationContext::new(loader, &mut sink);
        f(&mut self.data, &mut ctx)
    }

    /// Like [`operate`](Self::operate), with the read-only guard suspended
    /// for the duration of `f`.
    pub(crate) fn operate_unlocked<T>(
        &mut self,
        loader: &mut dyn RecordLoader,
        f: impl FnOnce(&mut DataManager, &mut OperationContext<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let _unlocker = self.lock.unlock();
        let mut sink = self.broker.sink(&self.lock);
        let mut ctx = OperationContext::new(loader, &mut sink);
        f(&mut self.data, &mut ctx)
    }

    /// Raises an event outside of any data operation.
    pub(crate) fn raise(&mut self, event: TransactionEvent) -> CoreResult<()> {
        self.broker.sink(&self.lock).raise_event(event)
    }
}

/// Builds the record source for a transaction whose ancestors are
/// `ancestors`, root first.
pub(crate) fn loader_for<'a>(
    ancestors: &'a mut [TransactionNode],
    store: &'a dyn PersistenceStrategy,
) -> Box<dyn RecordLoader + 'a> {
    match ancestors.split_last_mut() {
        None => Box::new(StoreLoader::new(store)),
        Some((parent, rest)) => Box::new(ParentLoader {
            parent,
            upstream: loader_for(rest, store),
        }),
    }
}

/// Reads records of a sub-transaction from its parent.
///
/// The parent loads lazily from its own source as needed. Records are
/// handed down as unchanged copies of the parent's current state.
struct ParentLoader<'a> {
    parent: &'a mut TransactionNode,
    upstream: Box<dyn RecordLoader + 'a>,
}

impl ParentLoader<'_> {
    fn with_parent<T>(
        &mut self,
        f: impl FnOnce(&mut DataManager, &mut OperationContext<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let upstream = self.upstream.as_mut();
        self.parent.operate_unlocked(upstream, f)
    }
}

fn copy_for_sub(record: &EntityStateRecord) -> CoreResult<EntityStateRecord> {
    match record.state() {
        RecordState::Deleted | RecordState::Invalid => {
            Err(CoreError::ObjectInvalid { id: record.id() })
        }
        _ => Ok(record.sub_copy()),
    }
}

fn related_copies(
    data: &mut DataManager,
    ctx: &mut OperationContext<'_>,
    endpoint: RelationEndpointId,
) -> CoreResult<Vec<EntityStateRecord>> {
    data.relation_endpoint(ctx, endpoint, LoadPolicy::WithLazyLoad)?;
    let related = data
        .endpoint(endpoint)
        .map(|e| e.related_ids(data.records()))
        .unwrap_or_default();
    related
        .into_iter()
        .map(|id| {
            let record = data.get_or_load(ctx, id)?;
            copy_for_sub(record)
        })
        .collect()
}

impl RecordLoader for ParentLoader<'_> {
    fn load_record(&mut self, id: EntityId) -> CoreResult<Option<EntityStateRecord>> {
        self.with_parent(|data, ctx| match data.try_get_or_load(ctx, id)? {
            Some(record) => copy_for_sub(record).map(Some),
            None => Ok(None),
        })
    }

    fn load_related_record(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Option<EntityStateRecord>> {
        self.with_parent(|data, ctx| {
            Ok(related_copies(data, ctx, endpoint)?.into_iter().next())
        })
    }

    fn load_related_records(
        &mut self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Vec<EntityStateRecord>> {
        self.with_parent(|data, ctx| related_copies(data, ctx, endpoint))
    }

    fn new_id(&mut self, class: ClassId) -> CoreResult<EntityId> {
        self.upstream.new_id(class)
    }

    fn current_timestamp(&mut self, id: EntityId) -> CoreResult<Option<Timestamp>> {
        Ok(self
            .parent
            .data
            .record(id)
            .and_then(EntityStateRecord::timestamp))
    }
}

impl std::fmt::Debug for TransactionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionNode")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.lock.is_active())
            .finish()
    }
}
