//! In-memory persistence strategy.

use crate::entity::{EntityId, EntityStateRecord};
use crate::error::{CoreError, CoreResult};
use crate::mapping::MetadataProvider;
use crate::persistence::stats::StoreStats;
use crate::persistence::strategy::{PersistState, PersistableRecord, PersistenceStrategy};
use crate::relation::RelationEndpointId;
use crate::types::{ClassId, Timestamp};
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One stored entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Values in slot order.
    pub values: Vec<Value>,
    /// Timestamp of the last write.
    pub timestamp: Timestamp,
}

/// A persistence strategy that keeps every row in memory.
///
/// Suitable for:
/// - Unit and integration tests
/// - Ephemeral data that never needs to outlive the process
///
/// # Thread Safety
///
/// The store is thread-safe and is usually shared as an
/// `Arc<InMemoryStore>` between the factory and test code that inspects it.
///
/// # Example
///
/// ```rust
/// use entiscope_core::{EntityId, InMemoryStore, MappingBuilder, Value, ValueKind};
/// use std::sync::Arc;
///
/// let mut builder = MappingBuilder::new();
/// let customer = builder.add_class("Customer").unwrap();
/// builder.add_property(customer, "name", ValueKind::Text, false).unwrap();
/// let store = InMemoryStore::new(Arc::new(builder.build()));
///
/// let id = EntityId::new(customer);
/// store.insert(id, vec![Value::text("Ada")]).unwrap();
/// assert_eq!(store.len(), 1);
/// ```
pub struct InMemoryStore {
    metadata: Arc<dyn MetadataProvider>,
    rows: RwLock<BTreeMap<EntityId, StoredRow>>,
    clock: AtomicU64,
    stats: StoreStats,
}

impl InMemoryStore {
    /// Creates an empty store for the classes described by `metadata`.
    #[must_use]
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            metadata,
            rows: RwLock::new(BTreeMap::new()),
            clock: AtomicU64::new(0),
            stats: StoreStats::new(),
        }
    }

    /// Seeds a row. Fails if the entity exists or the value count does not
    /// match the class.
    pub fn insert(&self, id: EntityId, values: Vec<Value>) -> CoreResult<Timestamp> {
        self.check_shape(id, &values)?;
        let mut rows = self.rows.write();
        if rows.contains_key(&id) {
            return Err(CoreError::persistence(format!("{id} already exists")));
        }
        let timestamp = self.tick();
        rows.insert(id, StoredRow { values, timestamp });
        Ok(timestamp)
    }

    /// Bumps the timestamp of a row as if another writer had updated it.
    pub fn touch(&self, id: EntityId) -> CoreResult<Timestamp> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(&id).ok_or(CoreError::NotFound { id })?;
        row.timestamp = self.tick();
        Ok(row.timestamp)
    }

    /// Overwrites one value of a row as another writer would.
    pub fn update(&self, id: EntityId, slot: usize, value: Value) -> CoreResult<Timestamp> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(&id).ok_or(CoreError::NotFound { id })?;
        let target = row
            .values
            .get_mut(slot)
            .ok_or_else(|| CoreError::persistence(format!("{id} has no slot {slot}")))?;
        *target = value;
        row.timestamp = self.tick();
        Ok(row.timestamp)
    }

    /// Returns a copy of a stored row.
    #[must_use]
    pub fn row(&self, id: EntityId) -> Option<StoredRow> {
        self.rows.read().get(&id).cloned()
    }

    /// Returns true if a row exists for `id`.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.rows.read().contains_key(&id)
    }

    /// Returns the IDs of every stored entity of `class`.
    #[must_use]
    pub fn ids_of(&self, class: ClassId) -> Vec<EntityId> {
        self.rows
            .read()
            .keys()
            .filter(|id| id.class() == class)
            .copied()
            .collect()
    }

    /// Returns the number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns the operation counters.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn tick(&self) -> Timestamp {
        Timestamp::new(self.clock.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn check_shape(&self, id: EntityId, values: &[Value]) -> CoreResult<()> {
        let class = self.metadata.require_class(id.class())?;
        if class.properties().len() != values.len() {
            return Err(CoreError::persistence(format!(
                "{id} has {} values, class {} declares {}",
                values.len(),
                class.name(),
                class.properties().len()
            )));
        }
        Ok(())
    }

    /// Scans for rows whose foreign key of the opposite real endpoint
    /// references the owner of `endpoint`.
    fn related_ids(&self, endpoint: RelationEndpointId) -> CoreResult<Vec<EntityId>> {
        self.stats.record_related_load();
        let Some(owner) = endpoint.entity() else {
            return Ok(Vec::new());
        };
        let definition = self.metadata.require_endpoint(endpoint.definition())?;
        if definition.is_real() {
            return Err(CoreError::structural(format!(
                "{endpoint} is a real endpoint and is never loaded separately"
            )));
        }
        let real = self.metadata.opposite_of(definition)?.ok_or_else(|| {
            CoreError::mapping(format!("virtual endpoint {} has no opposite", definition.id()))
        })?;
        let slot = real.foreign_key_slot().ok_or_else(|| {
            CoreError::mapping(format!("real endpoint {} has no foreign key", real.id()))
        })?;
        let expected = Value::Reference(owner);

        Ok(self
            .rows
            .read()
            .iter()
            .filter(|(id, row)| id.class() == real.class() && row.values.get(slot) == Some(&expected))
            .map(|(id, _)| *id)
            .collect())
    }

    fn to_record(&self, id: EntityId) -> Option<EntityStateRecord> {
        self.rows
            .read()
            .get(&id)
            .map(|row| EntityStateRecord::loaded(id, row.values.clone(), row.timestamp))
    }
}

impl PersistenceStrategy for InMemoryStore {
    fn load_record(&self, id: EntityId) -> CoreResult<Option<EntityStateRecord>> {
        self.stats.record_load();
        Ok(self.to_record(id))
    }

    fn load_related_record(
        &self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Option<EntityStateRecord>> {
        let ids = self.related_ids(endpoint)?;
        Ok(ids.first().and_then(|id| self.to_record(*id)))
    }

    fn load_related_records(
        &self,
        endpoint: RelationEndpointId,
    ) -> CoreResult<Vec<EntityStateRecord>> {
        let ids = self.related_ids(endpoint)?;
        Ok(ids.into_iter().filter_map(|id| self.to_record(id)).collect())
    }

    fn persist(&self, records: &[PersistableRecord]) -> CoreResult<Vec<(EntityId, Timestamp)>> {
        let mut rows = self.rows.write();

        for record in records {
            let existing = rows.get(&record.id);
            let valid = match record.state {
                PersistState::New => existing.is_none(),
                PersistState::Changed | PersistState::Deleted => {
                    existing.map(|r| r.timestamp) == record.expected && existing.is_some()
                }
            };
            if !valid {
                self.stats.record_conflict();
                return Err(CoreError::ConcurrencyViolation { id: record.id });
            }
            if record.state != PersistState::Deleted {
                self.check_shape(record.id, &record.values)?;
            }
        }

        let mut stamped = Vec::new();
        let (mut written, mut deleted) = (0, 0);
        for record in records {
            match record.state {
                PersistState::Deleted => {
                    rows.remove(&record.id);
                    deleted += 1;
                }
                PersistState::New | PersistState::Changed => {
                    let timestamp = self.tick();
                    rows.insert(
                        record.id,
                        StoredRow {
                            values: record.values.clone(),
                            timestamp,
                        },
                    );
                    stamped.push((record.id, timestamp));
                    written += 1;
                }
            }
        }
        self.stats.record_persist(written, deleted);
        debug!(written, deleted, "persisted commit set");
        Ok(stamped)
    }

    fn new_id(&self, class: ClassId) -> CoreResult<EntityId> {
        self.metadata.require_class(class)?;
        Ok(EntityId::new(class))
    }

    fn current_timestamp(&self, id: EntityId) -> CoreResult<Option<Timestamp>> {
        Ok(self.rows.read().get(&id).map(|r| r.timestamp))
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("rows", &self.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
