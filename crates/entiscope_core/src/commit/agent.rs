//! Staged commit and rollback of one transaction.

use crate::commit::validation::validate;
use crate::data::{DataManager, OperationContext};
use crate::entity::{EntityId, EntityStateRecord, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::TransactionEvent;
use crate::persistence::{PersistState, PersistableRecord, PersistenceStrategy};
use crate::relation::{Modification, RelationCommand, RelationEndpoint};
use crate::transaction::{loader_for, TransactionNode};
use std::collections::HashSet;
use tracing::{debug, warn};

/// One object of a commit set with the state it is committed in.
///
/// `Unchanged` marks an object whose own data is untouched but whose
/// virtual relation endpoints changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CommitEntry {
    pub(crate) id: EntityId,
    pub(crate) state: RecordState,
}

/// Runs commits and rollbacks.
///
/// A commit passes four phases:
/// 1. committing: listeners may veto or add objects to the commit set
/// 2. validation: nullability, mandatory relations and timestamps
/// 3. persistence: to the store for a root, into the parent for a sub
/// 4. committed notification, followed by the parent's notification
///
/// Nothing is written before validation has passed.
pub(crate) struct CommitRollbackAgent<'a> {
    store: &'a dyn PersistenceStrategy,
}

impl<'a> CommitRollbackAgent<'a> {
    pub(crate) fn new(store: &'a dyn PersistenceStrategy) -> Self {
        Self { store }
    }

    /// Commits `node`, whose ancestors are `ancestors`, root first.
    pub(crate) fn commit(
        &self,
        ancestors: &mut [TransactionNode],
        node: &mut TransactionNode,
    ) -> CoreResult<Vec<EntityId>> {
        let entries = {
            let mut loader = loader_for(ancestors, self.store);
            node.operate(loader.as_mut(), prepare)?
        };
        debug!(transaction = %node.id, count = entries.len(), "commit set validated");

        match ancestors.split_last_mut() {
            None => self.persist_to_store(&mut node.data, &entries)?,
            Some((parent, grand)) => {
                let mut loader = loader_for(grand, self.store);
                let source = &node.data;
                parent.operate_unlocked(loader.as_mut(), |target, ctx| {
                    merge_into_parent(source, target, ctx, &entries)
                })?;
                debug!(transaction = %node.id, parent = %parent.id, "merged into parent");
            }
        }

        let ids: Vec<EntityId> = entries.iter().map(|e| e.id).collect();
        if let Err(error) = node.raise(TransactionEvent::Committed { ids: ids.clone() }) {
            warn!(transaction = %node.id, %error, "committed listener failed");
        }
        if let Some(parent) = ancestors.last_mut() {
            let event = TransactionEvent::SubTransactionCommitted {
                sub: node.id,
                ids: ids.clone(),
            };
            if let Err(error) = parent.raise(event) {
                warn!(transaction = %parent.id, %error, "sub-transaction committed listener failed");
            }
        }
        Ok(ids)
    }

    fn persist_to_store(&self, data: &mut DataManager, entries: &[CommitEntry]) -> CoreResult<()> {
        let batch: Vec<PersistableRecord> = entries
            .iter()
            .filter_map(|entry| data.record(entry.id).map(|record| persistable(entry, record)))
            .collect();
        let stamped = if batch.is_empty() {
            Vec::new()
        } else {
            self.store.persist(&batch)?
        };

        for (id, timestamp) in stamped {
            if let Some(record) = data.records.get_mut(&id) {
                record.set_timestamp(timestamp);
            }
        }
        for id in data.records.ids_where(|r| r.state() != RecordState::Deleted) {
            if let Some(record) = data.records.get_mut(&id) {
                record.commit_state();
            }
        }
        data.endpoints.commit_all();
        for entry in entries.iter().filter(|e| e.state == RecordState::Deleted) {
            data.remove_record(entry.id)?;
            data.mark_invalid(entry.id);
        }
        debug!(transaction = %data.transaction(), records = batch.len(), "committed to store");
        Ok(())
    }

    /// Reverts every change of `node`. Does nothing, not even raise events,
    /// if the transaction has no changes.
    pub(crate) fn rollback(node: &mut TransactionNode) -> CoreResult<()> {
        if !node.data.has_changes() {
            return Ok(());
        }
        let touched = node.data.records.ids_where(EntityStateRecord::has_been_touched);
        node.raise(TransactionEvent::RollingBack {
            ids: touched.clone(),
        })?;

        let data = &mut node.data;
        data.endpoints.rollback_all();
        for id in &touched {
            let is_new = data.record(*id).is_some_and(|r| r.state() == RecordState::New);
            if is_new {
                data.discard_new(*id)?;
            } else if let Some(record) = data.records.get_mut(id) {
                record.rollback_state();
            }
        }
        debug!(transaction = %data.transaction(), records = touched.len(), "rolled back");
        node.raise(TransactionEvent::RolledBack { ids: touched })
    }
}

fn persistable(entry: &CommitEntry, record: &EntityStateRecord) -> PersistableRecord {
    let state = match entry.state {
        RecordState::New => PersistState::New,
        RecordState::Deleted => PersistState::Deleted,
        _ => PersistState::Changed,
    };
    PersistableRecord {
        id: entry.id,
        state,
        values: if state == PersistState::Deleted {
            Vec::new()
        } else {
            record.current_values()
        },
        expected: record.timestamp(),
    }
}

/// Builds and validates the commit set.
fn prepare(data: &mut DataManager, ctx: &mut OperationContext<'_>) -> CoreResult<Vec<CommitEntry>> {
    let mut selected: HashSet<EntityId> = data
        .records
        .ids_where(|r| {
            matches!(
                r.state(),
                RecordState::New | RecordState::Changed | RecordState::Deleted
            )
        })
        .into_iter()
        .collect();
    let owners: Vec<EntityId> = data
        .endpoints
        .ids_where(|e| e.is_virtual() && e.has_changed(data.records()))
        .into_iter()
        .filter_map(|endpoint| endpoint.entity())
        .collect();
    for owner in owners {
        data.get_or_load(ctx, owner)?;
        selected.insert(owner);
    }

    let mut round = data.records.ids_where(|r| selected.contains(&r.id()));
    let mut reraised = 0;
    loop {
        let mut event = TransactionEvent::Committing {
            ids: round,
            additional: Vec::new(),
        };
        ctx.events.raise(&mut event)?;
        let additional = match event {
            TransactionEvent::Committing { additional, .. } => additional,
            _ => Vec::new(),
        };

        let mut fresh = Vec::new();
        for id in additional {
            if selected.contains(&id) || fresh.contains(&id) {
                continue;
            }
            if data.get_or_load(ctx, id)?.state() == RecordState::Unchanged {
                data.mark_changed(ctx, id)?;
            }
            fresh.push(id);
        }
        if fresh.is_empty() {
            break;
        }
        if reraised == data.config.max_committing_rounds {
            return Err(CoreError::structural(format!(
                "committing listeners kept adding objects after {reraised} additional rounds"
            )));
        }
        reraised += 1;
        selected.extend(fresh.iter().copied());
        round = fresh;
    }

    let ids = data.records.ids_where(|r| selected.contains(&r.id()));
    ctx.events
        .raise_event(TransactionEvent::CommitValidate { ids: ids.clone() })?;
    let entries: Vec<CommitEntry> = ids
        .into_iter()
        .map(|id| CommitEntry {
            id,
            state: data.state_of(id),
        })
        .collect();
    validate(data, ctx, &entries)?;
    Ok(entries)
}

/// Transfers a committed sub-transaction's changes into its parent.
///
/// New records are registered, changed records overwrite the parent's
/// values, changed virtual endpoints take over the sub-transaction's data
/// without notification, and deletions run the parent's own delete so its
/// relation updates and events happen there.
fn merge_into_parent(
    source: &DataManager,
    target: &mut DataManager,
    ctx: &mut OperationContext<'_>,
    entries: &[CommitEntry],
) -> CoreResult<()> {
    let mut deleted = Vec::new();
    for entry in entries {
        let id = entry.id;
        let Some(record) = source.record(id) else {
            continue;
        };
        match entry.state {
            RecordState::New => {
                target.mark_valid(id);
                target.register_record(ctx, EntityStateRecord::new_from_sub(record))?;
            }
            RecordState::Changed => {
                target.get_or_load(ctx, id)?;
                target
                    .records
                    .get_mut(&id)
                    .ok_or(CoreError::NotFound { id })?
                    .set_data_from_sub(record);
            }
            RecordState::Deleted => deleted.push(id),
            _ => {}
        }
    }

    let mut command = RelationCommand::new();
    for endpoint in source.endpoints().iter() {
        if !endpoint.is_virtual() || !endpoint.has_changed(source.records()) {
            continue;
        }
        let id = endpoint.id();
        target.load_endpoint(ctx, id)?;
        match endpoint {
            RelationEndpoint::VirtualObject(object) => command.push(Modification::SetObject {
                endpoint: id,
                old: None,
                new: object.related(),
            }),
            RelationEndpoint::Collection(collection) => command.push(Modification::SetAll {
                endpoint: id,
                old: Vec::new(),
                new: collection.items().to_vec(),
            }),
            RelationEndpoint::Real(_) => {}
        }
    }
    command.perform(&mut target.records, &mut target.endpoints)?;

    for id in deleted {
        target.delete(ctx, id)?;
    }
    Ok(())
}
