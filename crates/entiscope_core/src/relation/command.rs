//! Relation modification commands.
//!
//! A bidirectional change touches up to four endpoints. It is planned up
//! front as a list of [`Modification`] steps and then either executed with
//! full notification or performed silently when data is transferred between
//! transactions.

use crate::entity::{EntityId, RecordMap};
use crate::error::{CoreError, CoreResult};
use crate::event::{EventSink, TransactionEvent};
use crate::relation::endpoint::CollectionData;
use crate::relation::id::RelationEndpointId;
use crate::relation::registry::RelationEndpointRegistry;
use crate::value::Value;

/// One step of a relation change, applied to a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Modification {
    /// Writes a foreign key into the owning record.
    SetReal {
        endpoint: RelationEndpointId,
        slot: usize,
        old: Option<EntityId>,
        new: Option<EntityId>,
    },
    /// Replaces the entity held by a single-valued virtual endpoint.
    SetObject {
        endpoint: RelationEndpointId,
        old: Option<EntityId>,
        new: Option<EntityId>,
    },
    /// Inserts into a collection.
    Insert {
        endpoint: RelationEndpointId,
        index: usize,
        item: EntityId,
    },
    /// Removes from a collection. Removing an absent item does nothing.
    Remove {
        endpoint: RelationEndpointId,
        item: EntityId,
    },
    /// Replaces the item at `index`.
    Replace {
        endpoint: RelationEndpointId,
        index: usize,
        old: EntityId,
        new: EntityId,
    },
    /// Replaces the whole collection.
    SetAll {
        endpoint: RelationEndpointId,
        old: Vec<EntityId>,
        new: Vec<EntityId>,
    },
}

impl Modification {
    pub(crate) fn endpoint(&self) -> RelationEndpointId {
        match self {
            Self::SetReal { endpoint, .. }
            | Self::SetObject { endpoint, .. }
            | Self::Insert { endpoint, .. }
            | Self::Remove { endpoint, .. }
            | Self::Replace { endpoint, .. }
            | Self::SetAll { endpoint, .. } => *endpoint,
        }
    }

    /// Returns the (old, new) pair reported to listeners.
    fn change(&self) -> (Option<EntityId>, Option<EntityId>) {
        match self {
            Self::SetReal { old, new, .. } | Self::SetObject { old, new, .. } => (*old, *new),
            Self::Insert { item, .. } => (None, Some(*item)),
            Self::Remove { item, .. } => (Some(*item), None),
            Self::Replace { old, new, .. } => (Some(*old), Some(*new)),
            Self::SetAll { .. } => (None, None),
        }
    }

    fn is_virtual(&self) -> bool {
        !matches!(self, Self::SetReal { .. })
    }

    fn apply(&self, records: &mut RecordMap, registry: &mut RelationEndpointRegistry) -> CoreResult<()> {
        let endpoint = self.endpoint();
        match self {
            Self::SetReal { slot, new, .. } => {
                let Some(owner) = endpoint.entity() else {
                    return Ok(());
                };
                let record = records
                    .get_mut(&owner)
                    .ok_or_else(|| CoreError::structural(format!("{owner} is not registered")))?;
                record.set_value(*slot, Value::from(*new))?;
                registry.real_mut(&endpoint)?.touch();
            }
            Self::SetObject { new, .. } => {
                registry.object_mut(&endpoint)?.set_related(*new);
            }
            Self::Insert { index, item, .. } => {
                registry.collection_mut(&endpoint)?.insert(*index, *item)?;
            }
            Self::Remove { item, .. } => {
                registry.collection_mut(&endpoint)?.remove(item);
            }
            Self::Replace { index, new, .. } => {
                registry.collection_mut(&endpoint)?.replace(*index, *new)?;
            }
            Self::SetAll { new, .. } => {
                registry
                    .collection_mut(&endpoint)?
                    .set_current(CollectionData(new.clone()));
            }
        }
        Ok(())
    }
}

/// An ordered set of modifications applied as one relation change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RelationCommand {
    steps: Vec<Modification>,
}

impl RelationCommand {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a step. Steps on null endpoints are dropped.
    pub(crate) fn push(&mut self, step: Modification) {
        if !step.endpoint().is_null() {
            self.steps.push(step);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn steps(&self) -> &[Modification] {
        &self.steps
    }

    /// Applies every step without raising events.
    pub(crate) fn perform(
        &self,
        records: &mut RecordMap,
        registry: &mut RelationEndpointRegistry,
    ) -> CoreResult<()> {
        for step in &self.steps {
            step.apply(records, registry)?;
        }
        Ok(())
    }

    /// Applies every step between changing and changed notifications.
    ///
    /// Changing events are raised in step order and changed events in
    /// reverse order. Afterwards every touched virtual endpoint reports its
    /// new state once.
    pub(crate) fn execute(
        &self,
        records: &mut RecordMap,
        registry: &mut RelationEndpointRegistry,
        events: &mut dyn EventSink,
    ) -> CoreResult<()> {
        for step in &self.steps {
            let (old, new) = step.change();
            events.raise_event(TransactionEvent::RelationChanging {
                endpoint: step.endpoint(),
                old,
                new,
            })?;
        }

        self.perform(records, registry)?;

        for step in self.steps.iter().rev() {
            let (old, new) = step.change();
            events.raise_event(TransactionEvent::RelationChanged {
                endpoint: step.endpoint(),
                old,
                new,
            })?;
        }

        let mut reported: Vec<RelationEndpointId> = Vec::new();
        for step in self.steps.iter().filter(|s| s.is_virtual()) {
            let endpoint = step.endpoint();
            if reported.contains(&endpoint) {
                continue;
            }
            reported.push(endpoint);
            let has_changed = registry
                .get(&endpoint)
                .is_some_and(|e| e.has_changed(records));
            events.raise_event(TransactionEvent::VirtualRelationStateUpdated {
                endpoint,
                has_changed,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityStateRecord;
    use crate::event::{EventKind, RecordingSink};
    use crate::relation::endpoint::{CollectionEndpoint, RealEndpoint, RelationEndpoint, SyncState};
    use crate::types::{ClassId, EndpointDefId, Timestamp};

    struct Fixture {
        records: RecordMap,
        registry: RelationEndpointRegistry,
        customer: EntityId,
        order: EntityId,
    }

    fn fixture() -> Fixture {
        let customer = EntityId::new(ClassId::new(1));
        let order = EntityId::new(ClassId::new(2));
        let mut records = RecordMap::new();
        records
            .register(EntityStateRecord::loaded(order, vec![Value::Null], Timestamp::new(1)))
            .unwrap();
        let mut registry = RelationEndpointRegistry::new();
        registry
            .register(RelationEndpoint::Real(RealEndpoint::new(
                RelationEndpointId::new(order, EndpointDefId::new(1)),
                0,
                SyncState::Synchronized,
            )))
            .unwrap();
        let mut orders =
            CollectionEndpoint::incomplete(RelationEndpointId::new(customer, EndpointDefId::new(2)));
        orders.mark_data_complete(vec![]).unwrap();
        registry.register(RelationEndpoint::Collection(orders)).unwrap();
        Fixture {
            records,
            registry,
            customer,
            order,
        }
    }

    fn link(f: &Fixture) -> RelationCommand {
        let mut command = RelationCommand::new();
        command.push(Modification::SetReal {
            endpoint: RelationEndpointId::new(f.order, EndpointDefId::new(1)),
            slot: 0,
            old: None,
            new: Some(f.customer),
        });
        command.push(Modification::Insert {
            endpoint: RelationEndpointId::new(f.customer, EndpointDefId::new(2)),
            index: 0,
            item: f.order,
        });
        command.push(Modification::Remove {
            endpoint: RelationEndpointId::null(EndpointDefId::new(2)),
            item: f.order,
        });
        command
    }

    #[test]
    fn null_steps_are_dropped() {
        let f = fixture();
        assert_eq!(link(&f).steps().len(), 2);
    }

    #[test]
    fn perform_updates_both_sides() {
        let mut f = fixture();
        let command = link(&f);
        command.perform(&mut f.records, &mut f.registry).unwrap();

        assert_eq!(
            f.records.get(&f.order).unwrap().value(0),
            &Value::Reference(f.customer)
        );
        let orders = f
            .registry
            .get(&RelationEndpointId::new(f.customer, EndpointDefId::new(2)))
            .unwrap();
        assert_eq!(orders.related_ids(&f.records), vec![f.order]);
        assert!(orders.has_changed(&f.records));
    }

    #[test]
    fn execute_orders_events() {
        let mut f = fixture();
        let command = link(&f);
        let mut sink = RecordingSink::default();
        command
            .execute(&mut f.records, &mut f.registry, &mut sink)
            .unwrap();

        assert_eq!(
            sink.kinds(),
            vec![
                EventKind::RelationChanging,
                EventKind::RelationChanging,
                EventKind::RelationChanged,
                EventKind::RelationChanged,
                EventKind::VirtualRelationStateUpdated,
            ]
        );
        match &sink.events[2] {
            TransactionEvent::RelationChanged { endpoint, .. } => {
                assert_eq!(endpoint.entity(), Some(f.customer));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn vetoed_change_leaves_data_untouched() {
        let mut f = fixture();
        let command = link(&f);
        let mut sink = RecordingSink::vetoing(EventKind::RelationChanging);
        let result = command.execute(&mut f.records, &mut f.registry, &mut sink);

        assert!(matches!(result, Err(CoreError::Vetoed { .. })));
        assert_eq!(f.records.get(&f.order).unwrap().value(0), &Value::Null);
    }
}
