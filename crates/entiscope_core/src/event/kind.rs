//! Transaction events.

use crate::entity::{EntityId, RecordState};
use crate::relation::RelationEndpointId;
use crate::types::{ClassId, TransactionId};
use crate::value::Value;

/// Discriminant of a [`TransactionEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
    SubTransactionCreating,
    SubTransactionCreated,
    SubTransactionCommitted,
    TransactionDiscarded,
    NewObjectCreating,
    ObjectsLoading,
    ObjectsLoaded,
    ObjectsNotFound,
    ObjectsUnloading,
    ObjectsUnloaded,
    RecordRegistering,
    RecordUnregistering,
    ObjectDeleting,
    ObjectDeleted,
    MarkingChanged,
    PropertyValueChanging,
    PropertyValueChanged,
    RelationChanging,
    RelationChanged,
    RelationDataUnloading,
    RelationDataUnloaded,
    VirtualRelationStateUpdated,
    Committing,
    CommitValidate,
    Committed,
    RollingBack,
    RolledBack,
}

/// A state transition reported through a transaction's event broker.
///
/// "About-to" events (`*ing`) are raised before the change and may be
/// vetoed by returning an error from a handler; "did" events follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// A sub-transaction is about to be created.
    SubTransactionCreating,
    /// A sub-transaction was created.
    SubTransactionCreated {
        /// The new sub-transaction.
        sub: TransactionId,
    },
    /// A sub-transaction merged its changes into this transaction.
    SubTransactionCommitted {
        /// The committed sub-transaction.
        sub: TransactionId,
        /// Entities that were transferred.
        ids: Vec<EntityId>,
    },
    /// The transaction was discarded.
    TransactionDiscarded,
    /// An entity of `class` is about to be created.
    NewObjectCreating {
        /// Class of the new entity.
        class: ClassId,
    },
    /// Entities are about to be loaded.
    ObjectsLoading {
        /// Entities being loaded.
        ids: Vec<EntityId>,
    },
    /// Entities were loaded and registered.
    ObjectsLoaded {
        /// Entities loaded.
        ids: Vec<EntityId>,
    },
    /// Loading found no record for these entities.
    ObjectsNotFound {
        /// Entities not found.
        ids: Vec<EntityId>,
    },
    /// Entities are about to be unloaded, in registration order.
    ObjectsUnloading {
        /// Entities being unloaded.
        ids: Vec<EntityId>,
    },
    /// Entities were unloaded, in reverse registration order.
    ObjectsUnloaded {
        /// Entities unloaded.
        ids: Vec<EntityId>,
    },
    /// A record is about to be registered.
    RecordRegistering {
        /// The entity.
        id: EntityId,
        /// State of the incoming record.
        state: RecordState,
    },
    /// A record is about to be removed.
    RecordUnregistering {
        /// The entity.
        id: EntityId,
    },
    /// An entity is about to be deleted.
    ObjectDeleting {
        /// The entity.
        id: EntityId,
    },
    /// An entity was deleted.
    ObjectDeleted {
        /// The entity.
        id: EntityId,
    },
    /// An unchanged entity is about to be forced into the commit set.
    MarkingChanged {
        /// The entity.
        id: EntityId,
    },
    /// A property is about to change.
    PropertyValueChanging {
        /// The entity.
        id: EntityId,
        /// Property name.
        property: String,
        /// Current value.
        old: Value,
        /// Value being assigned.
        new: Value,
    },
    /// A property changed.
    PropertyValueChanged {
        /// The entity.
        id: EntityId,
        /// Property name.
        property: String,
        /// Previous value.
        old: Value,
        /// New value.
        new: Value,
    },
    /// A relation endpoint is about to change.
    RelationChanging {
        /// The endpoint.
        endpoint: RelationEndpointId,
        /// Entity leaving the endpoint.
        old: Option<EntityId>,
        /// Entity entering the endpoint.
        new: Option<EntityId>,
    },
    /// A relation endpoint changed.
    RelationChanged {
        /// The endpoint.
        endpoint: RelationEndpointId,
        /// Entity that left the endpoint.
        old: Option<EntityId>,
        /// Entity that entered the endpoint.
        new: Option<EntityId>,
    },
    /// Loaded relation data is about to be discarded.
    RelationDataUnloading {
        /// The endpoint.
        endpoint: RelationEndpointId,
    },
    /// Loaded relation data was discarded.
    RelationDataUnloaded {
        /// The endpoint.
        endpoint: RelationEndpointId,
    },
    /// A virtual endpoint was loaded or changed.
    VirtualRelationStateUpdated {
        /// The endpoint.
        endpoint: RelationEndpointId,
        /// Whether the endpoint now differs from its original data.
        has_changed: bool,
    },
    /// The commit set is about to be validated and persisted.
    ///
    /// Handlers may add entities to `additional`; they join the commit set
    /// and the event is raised again for them.
    Committing {
        /// Entities in this committing round.
        ids: Vec<EntityId>,
        /// Entities handlers want to commit as well.
        additional: Vec<EntityId>,
    },
    /// The commit set is being validated.
    CommitValidate {
        /// The full commit set.
        ids: Vec<EntityId>,
    },
    /// The commit finished.
    Committed {
        /// Committed entities.
        ids: Vec<EntityId>,
    },
    /// Changes are about to be rolled back.
    RollingBack {
        /// Entities with changes.
        ids: Vec<EntityId>,
    },
    /// Changes were rolled back.
    RolledBack {
        /// Entities that were reverted.
        ids: Vec<EntityId>,
    },
}

impl TransactionEvent {
    /// Returns the event discriminant.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SubTransactionCreating => EventKind::SubTransactionCreating,
            Self::SubTransactionCreated { .. } => EventKind::SubTransactionCreated,
            Self::SubTransactionCommitted { .. } => EventKind::SubTransactionCommitted,
            Self::TransactionDiscarded => EventKind::TransactionDiscarded,
            Self::NewObjectCreating { .. } => EventKind::NewObjectCreating,
            Self::ObjectsLoading { .. } => EventKind::ObjectsLoading,
            Self::ObjectsLoaded { .. } => EventKind::ObjectsLoaded,
            Self::ObjectsNotFound { .. } => EventKind::ObjectsNotFound,
            Self::ObjectsUnloading { .. } => EventKind::ObjectsUnloading,
            Self::ObjectsUnloaded { .. } => EventKind::ObjectsUnloaded,
            Self::RecordRegistering { .. } => EventKind::RecordRegistering,
            Self::RecordUnregistering { .. } => EventKind::RecordUnregistering,
            Self::ObjectDeleting { .. } => EventKind::ObjectDeleting,
            Self::ObjectDeleted { .. } => EventKind::ObjectDeleted,
            Self::MarkingChanged { .. } => EventKind::MarkingChanged,
            Self::PropertyValueChanging { .. } => EventKind::PropertyValueChanging,
            Self::PropertyValueChanged { .. } => EventKind::PropertyValueChanged,
            Self::RelationChanging { .. } => EventKind::RelationChanging,
            Self::RelationChanged { .. } => EventKind::RelationChanged,
            Self::RelationDataUnloading { .. } => EventKind::RelationDataUnloading,
            Self::RelationDataUnloaded { .. } => EventKind::RelationDataUnloaded,
            Self::VirtualRelationStateUpdated { .. } => EventKind::VirtualRelationStateUpdated,
            Self::Committing { .. } => EventKind::Committing,
            Self::CommitValidate { .. } => EventKind::CommitValidate,
            Self::Committed { .. } => EventKind::Committed,
            Self::RollingBack { .. } => EventKind::RollingBack,
            Self::RolledBack { .. } => EventKind::RolledBack,
        }
    }

    /// Returns true for notifications of changes an inactive transaction
    /// must reject.
    ///
    /// Loading data into a transaction does not count as a change; creating
    /// a new record does.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        match self {
            Self::RecordRegistering { state, .. } => *state == RecordState::New,
            Self::SubTransactionCreating
            | Self::NewObjectCreating { .. }
            | Self::ObjectsUnloading { .. }
            | Self::RecordUnregistering { .. }
            | Self::ObjectDeleting { .. }
            | Self::MarkingChanged { .. }
            | Self::PropertyValueChanging { .. }
            | Self::RelationChanging { .. }
            | Self::RelationDataUnloading { .. }
            | Self::Committing { .. }
            | Self::RollingBack { .. } => true,
            _ => false,
        }
    }

    /// Describes the operation behind a mutating event.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::SubTransactionCreating => "create a sub-transaction",
            Self::NewObjectCreating { .. } => "create a new object",
            Self::ObjectsUnloading { .. } => "unload objects",
            Self::RecordRegistering { .. } => "register a new record",
            Self::RecordUnregistering { .. } => "unregister a record",
            Self::ObjectDeleting { .. } => "delete an object",
            Self::MarkingChanged { .. } => "mark an object as changed",
            Self::PropertyValueChanging { .. } => "change a property",
            Self::RelationChanging { .. } => "change a relation",
            Self::RelationDataUnloading { .. } => "unload relation data",
            Self::Committing { .. } => "commit",
            Self::RollingBack { .. } => "roll back",
            _ => "notify",
        }
    }
}
