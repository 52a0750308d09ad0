//! Entity state records.
//!
//! A record owns the property values of one entity inside one transaction,
//! together with its lifecycle state and the timestamp it was loaded with.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use crate::value::Value;
use std::collections::HashMap;

/// Current and original value of a single property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    current: Value,
    original: Value,
    touched: bool,
}

impl PropertyValue {
    /// Creates an untouched property whose original equals its current value.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            original: value.clone(),
            current: value,
            touched: false,
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn current(&self) -> &Value {
        &self.current
    }

    /// Returns the value the property had when it was loaded or last committed.
    #[must_use]
    pub fn original(&self) -> &Value {
        &self.original
    }

    /// Returns true if the current value differs from the original.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.current != self.original
    }

    /// Returns true if the property was assigned since load or commit,
    /// even if the value ended up unchanged.
    #[must_use]
    pub fn has_been_touched(&self) -> bool {
        self.touched
    }

    fn set(&mut self, value: Value) -> Value {
        self.touched = true;
        std::mem::replace(&mut self.current, value)
    }

    fn commit(&mut self) {
        self.original = self.current.clone();
        self.touched = false;
    }

    fn rollback(&mut self) {
        self.current = self.original.clone();
        self.touched = false;
    }
}

/// Externally visible state of an entity in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Created in this transaction and not yet committed.
    New,
    /// Loaded and not modified.
    Unchanged,
    /// Loaded and modified (or explicitly marked for commit).
    Changed,
    /// Deleted in this transaction; the deletion is not committed yet.
    Deleted,
    /// Permanently unusable in this transaction.
    Invalid,
    /// Known to the transaction but its data has not been fetched.
    NotLoadedYet,
}

/// Stored lifecycle of a record. `Changed` is derived from property state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    NotLoadedYet,
    New,
    Existing,
    Deleted,
    Invalid,
}

/// Per-entity property storage plus lifecycle state.
#[derive(Debug, Clone)]
pub struct EntityStateRecord {
    id: EntityId,
    values: Vec<PropertyValue>,
    lifecycle: Lifecycle,
    marked_changed: bool,
    timestamp: Option<Timestamp>,
    registration: u64,
}

impl EntityStateRecord {
    /// Creates a record for data that was read from persistent storage.
    #[must_use]
    pub fn loaded(id: EntityId, values: Vec<Value>, timestamp: Timestamp) -> Self {
        Self {
            id,
            values: values.into_iter().map(PropertyValue::new).collect(),
            lifecycle: Lifecycle::Existing,
            marked_changed: false,
            timestamp: Some(timestamp),
            registration: 0,
        }
    }

    /// Creates the record of a newly instantiated entity with all properties null.
    #[must_use]
    pub fn new_object(id: EntityId, property_count: usize) -> Self {
        Self {
            id,
            values: vec![PropertyValue::new(Value::Null); property_count],
            lifecycle: Lifecycle::New,
            marked_changed: false,
            timestamp: None,
            registration: 0,
        }
    }

    /// Creates a placeholder for an entity whose data has not been fetched.
    #[must_use]
    pub fn not_loaded(id: EntityId) -> Self {
        Self {
            id,
            values: Vec::new(),
            lifecycle: Lifecycle::NotLoadedYet,
            marked_changed: false,
            timestamp: None,
            registration: 0,
        }
    }

    /// Copies this record for use in a sub-transaction.
    ///
    /// The copy takes the current values as both current and original and
    /// starts out unchanged, whatever state this record is in.
    #[must_use]
    pub fn sub_copy(&self) -> Self {
        Self {
            id: self.id,
            values: self
                .values
                .iter()
                .map(|p| PropertyValue::new(p.current.clone()))
                .collect(),
            lifecycle: match self.lifecycle {
                Lifecycle::Deleted | Lifecycle::Invalid => Lifecycle::Invalid,
                Lifecycle::NotLoadedYet => Lifecycle::NotLoadedYet,
                Lifecycle::New | Lifecycle::Existing => Lifecycle::Existing,
            },
            marked_changed: false,
            timestamp: self.timestamp,
            registration: 0,
        }
    }

    /// Returns the entity ID.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> RecordState {
        match self.lifecycle {
            Lifecycle::NotLoadedYet => RecordState::NotLoadedYet,
            Lifecycle::New => RecordState::New,
            Lifecycle::Deleted => RecordState::Deleted,
            Lifecycle::Invalid => RecordState::Invalid,
            Lifecycle::Existing if self.marked_changed || self.has_changed_properties() => {
                RecordState::Changed
            }
            Lifecycle::Existing => RecordState::Unchanged,
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns the timestamp observed when the record was loaded.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = Some(timestamp);
    }

    pub(crate) fn registration(&self) -> u64 {
        self.registration
    }

    /// Returns the number of property slots.
    #[must_use]
    pub fn property_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the property at `slot`.
    #[must_use]
    pub fn property(&self, slot: usize) -> Option<&PropertyValue> {
        self.values.get(slot)
    }

    /// Returns all properties in slot order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyValue] {
        &self.values
    }

    /// Returns the current value at `slot`, or null for an unknown slot.
    #[must_use]
    pub fn value(&self, slot: usize) -> &Value {
        self.values.get(slot).map_or(&Value::Null, |p| &p.current)
    }

    /// Returns the original value at `slot`, or null for an unknown slot.
    #[must_use]
    pub fn original_value(&self, slot: usize) -> &Value {
        self.values.get(slot).map_or(&Value::Null, |p| &p.original)
    }

    /// Returns the current values in slot order.
    #[must_use]
    pub fn current_values(&self) -> Vec<Value> {
        self.values.iter().map(|p| p.current.clone()).collect()
    }

    /// Returns true if any property differs from its original value.
    #[must_use]
    pub fn has_changed_properties(&self) -> bool {
        self.values.iter().any(PropertyValue::has_changed)
    }

    /// Returns true if the record carries anything rollback would undo.
    #[must_use]
    pub fn has_been_touched(&self) -> bool {
        self.marked_changed
            || matches!(self.lifecycle, Lifecycle::New | Lifecycle::Deleted)
            || self.values.iter().any(PropertyValue::has_been_touched)
    }

    /// Fails unless the record holds usable data.
    pub(crate) fn ensure_usable(&self) -> CoreResult<()> {
        match self.lifecycle {
            Lifecycle::New | Lifecycle::Existing => Ok(()),
            Lifecycle::Deleted => Err(CoreError::ObjectDeleted { id: self.id }),
            Lifecycle::Invalid => Err(CoreError::ObjectInvalid { id: self.id }),
            Lifecycle::NotLoadedYet => Err(CoreError::structural(format!(
                "data of {} has not been loaded",
                self.id
            ))),
        }
    }

    /// Assigns a value and returns the previous one.
    pub(crate) fn set_value(&mut self, slot: usize, value: Value) -> CoreResult<Value> {
        self.ensure_usable()?;
        let id = self.id;
        let property = self
            .values
            .get_mut(slot)
            .ok_or_else(|| CoreError::structural(format!("{id} has no property slot {slot}")))?;
        Ok(property.set(value))
    }

    /// Forces an unchanged record into the commit set.
    pub(crate) fn mark_changed(&mut self) -> CoreResult<()> {
        match self.lifecycle {
            Lifecycle::Existing => {
                self.marked_changed = true;
                Ok(())
            }
            Lifecycle::New => Ok(()),
            _ => self.ensure_usable(),
        }
    }

    /// Moves the record to the deleted state. Only existing records can be
    /// deleted; new records are discarded by the data manager instead.
    pub(crate) fn mark_deleted(&mut self) -> CoreResult<()> {
        match self.lifecycle {
            Lifecycle::Existing => {
                self.lifecycle = Lifecycle::Deleted;
                Ok(())
            }
            Lifecycle::Deleted => Ok(()),
            Lifecycle::New => Err(CoreError::structural(format!(
                "new object {} must be discarded, not marked deleted",
                self.id
            ))),
            _ => self.ensure_usable(),
        }
    }

    /// Marks the record as permanently invalid.
    pub(crate) fn discard(&mut self) {
        self.lifecycle = Lifecycle::Invalid;
    }

    /// Accepts the current state as the new original state.
    pub(crate) fn commit_state(&mut self) {
        for property in &mut self.values {
            property.commit();
        }
        self.marked_changed = false;
        if self.lifecycle == Lifecycle::New {
            self.lifecycle = Lifecycle::Existing;
        }
    }

    /// Reverts every property to its original value. Deleted records become
    /// existing again.
    pub(crate) fn rollback_state(&mut self) {
        for property in &mut self.values {
            property.rollback();
        }
        self.marked_changed = false;
        if self.lifecycle == Lifecycle::Deleted {
            self.lifecycle = Lifecycle::Existing;
        }
    }

    /// Takes over the changed values of a committed sub-transaction record.
    pub(crate) fn set_data_from_sub(&mut self, source: &EntityStateRecord) {
        for (target, incoming) in self.values.iter_mut().zip(&source.values) {
            if incoming.has_changed() || incoming.has_been_touched() {
                target.set(incoming.current.clone());
            }
        }
        if source.marked_changed && self.lifecycle == Lifecycle::Existing {
            self.marked_changed = true;
        }
        self.timestamp = source.timestamp;
    }

    /// Creates the parent-side record for an object that was new in a
    /// committed sub-transaction.
    pub(crate) fn new_from_sub(source: &EntityStateRecord) -> Self {
        Self {
            id: source.id,
            values: source
                .values
                .iter()
                .map(|p| PropertyValue::new(p.current.clone()))
                .collect(),
            lifecycle: Lifecycle::New,
            marked_changed: false,
            timestamp: None,
            registration: 0,
        }
    }
}

/// Map of entity records in registration order.
#[derive(Debug, Default)]
pub struct RecordMap {
    records: HashMap<EntityId, EntityStateRecord>,
    next_registration: u64,
}

impl RecordMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record. A not-loaded placeholder for the same ID is replaced
    /// and keeps its registration position.
    pub(crate) fn register(&mut self, mut record: EntityStateRecord) -> CoreResult<()> {
        let id = record.id;
        match self.records.get(&id) {
            Some(existing) if existing.lifecycle == Lifecycle::NotLoadedYet => {
                record.registration = existing.registration;
            }
            Some(_) => {
                return Err(CoreError::structural(format!(
                    "a record for {id} is already registered"
                )));
            }
            None => {
                record.registration = self.next_registration;
                self.next_registration += 1;
            }
        }
        self.records.insert(id, record);
        Ok(())
    }

    /// Returns the record for `id`.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&EntityStateRecord> {
        self.records.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &EntityId) -> Option<&mut EntityStateRecord> {
        self.records.get_mut(id)
    }

    pub(crate) fn remove(&mut self, id: &EntityId) -> Option<EntityStateRecord> {
        self.records.remove(id)
    }

    /// Returns true if a record (or placeholder) exists for `id`.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    /// Returns the number of registered records, placeholders included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the records in registration order.
    #[must_use]
    pub fn in_registration_order(&self) -> Vec<&EntityStateRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|r| r.registration);
        records
    }

    /// Returns the IDs of records matching `filter`, in registration order.
    #[must_use]
    pub fn ids_where(&self, filter: impl Fn(&EntityStateRecord) -> bool) -> Vec<EntityId> {
        self.in_registration_order()
            .into_iter()
            .filter(|r| filter(r))
            .map(|r| r.id)
            .collect()
    }
}
