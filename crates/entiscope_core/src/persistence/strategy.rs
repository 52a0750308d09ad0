//! Contract with the external storage layer.

use crate::entity::{EntityId, EntityStateRecord};
use crate::error::CoreResult;
use crate::relation::RelationEndpointId;
use crate::types::{ClassId, Timestamp};
use crate::value::Value;

/// How a record is written by [`PersistenceStrategy::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistState {
    /// Insert a record that does not exist yet.
    New,
    /// Overwrite an existing record.
    Changed,
    /// Remove an existing record.
    Deleted,
}

/// A record handed to the store at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistableRecord {
    /// The entity.
    pub id: EntityId,
    /// Kind of write.
    pub state: PersistState,
    /// Current values in slot order; empty for deletions.
    pub values: Vec<Value>,
    /// Timestamp the record was loaded with; `None` for new records.
    pub expected: Option<Timestamp>,
}

/// Storage collaborator of a root transaction.
///
/// Implementations must make [`persist`](Self::persist) all-or-nothing: if
/// any record fails its timestamp check, nothing is written.
pub trait PersistenceStrategy: Send + Sync {
    /// Loads one record, `None` if the entity does not exist.
    fn load_record(&self, id: EntityId) -> CoreResult<Option<EntityStateRecord>>;

    /// Loads the record related through a single-valued virtual endpoint.
    fn load_related_record(
        &self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Option<EntityStateRecord>>;

    /// Loads the records related through a collection endpoint.
    fn load_related_records(&self, endpoint: RelationEndpointId)
        -> CoreResult<Vec<EntityStateRecord>>;

    /// Writes a commit set and returns the new timestamp of every record
    /// that was inserted or updated.
    fn persist(&self, records: &[PersistableRecord]) -> CoreResult<Vec<(EntityId, Timestamp)>>;

    /// Allocates the ID of a new entity.
    fn new_id(&self, class: ClassId) -> CoreResult<EntityId>;

    /// Returns the timestamp currently stored for `id`.
    fn current_timestamp(&self, id: EntityId) -> CoreResult<Option<Timestamp>>;
}
