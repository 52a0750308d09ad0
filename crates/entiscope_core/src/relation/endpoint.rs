//! Relation endpoint variants and their load/sync state machines.

use crate::entity::{EntityId, RecordMap};
use crate::error::{CoreError, CoreResult};
use crate::relation::id::RelationEndpointId;
use crate::types::EndpointDefId;
use std::collections::BTreeSet;
use std::fmt;

/// Whether a virtual endpoint's data has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Data has not been loaded; reads must load first.
    Incomplete,
    /// Data is loaded.
    Complete,
}

/// Whether a real endpoint is known to its opposite endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    /// The opposite endpoint is incomplete; reconciliation happens on load.
    Unknown,
    /// Both sides agree.
    Synchronized,
    /// The opposite endpoint was loaded without this entity.
    Unsynchronized,
}

/// The foreign-key owning side of a relation.
///
/// Its value lives in the owning record's foreign-key slot, so it is always
/// complete. Only its synchronization with the opposite side is tracked here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealEndpoint {
    id: RelationEndpointId,
    slot: usize,
    sync: SyncState,
    touched: bool,
}

impl RealEndpoint {
    pub(crate) fn new(id: RelationEndpointId, slot: usize, sync: SyncState) -> Self {
        Self {
            id,
            slot,
            sync,
            touched: false,
        }
    }

    /// Returns the endpoint ID.
    #[must_use]
    pub fn id(&self) -> RelationEndpointId {
        self.id
    }

    /// Returns the foreign-key slot in the owning record.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the synchronization state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub(crate) fn set_sync_state(&mut self, sync: SyncState) {
        self.sync = sync;
    }

    /// Returns the currently referenced entity.
    #[must_use]
    pub fn current(&self, records: &RecordMap) -> Option<EntityId> {
        self.id
            .entity()
            .and_then(|e| records.get(&e))
            .and_then(|r| r.value(self.slot).as_reference())
    }

    /// Returns the originally referenced entity.
    #[must_use]
    pub fn original(&self, records: &RecordMap) -> Option<EntityId> {
        self.id
            .entity()
            .and_then(|e| records.get(&e))
            .and_then(|r| r.original_value(self.slot).as_reference())
    }

    /// Returns true if the foreign key differs from its original value.
    #[must_use]
    pub fn has_changed(&self, records: &RecordMap) -> bool {
        self.current(records) != self.original(records)
    }

    /// Returns true if the endpoint was modified since load or commit.
    #[must_use]
    pub fn has_been_touched(&self) -> bool {
        self.touched
    }

    pub(crate) fn touch(&mut self) {
        self.touched = true;
    }

    pub(crate) fn reset_touched(&mut self) {
        self.touched = false;
    }
}

/// Data held by a virtual endpoint.
pub trait EndpointData: Clone + Default + PartialEq + fmt::Debug {
    /// Builds the data from loaded items.
    fn from_items(items: Vec<EntityId>) -> Self;

    /// Returns the related entities.
    fn items(&self) -> Vec<EntityId>;

    /// Returns true if `id` is related.
    fn contains(&self, id: &EntityId) -> bool;

    /// Returns true if nothing is related.
    fn is_empty(&self) -> bool;

    /// Takes `item` as an original opposite of complete, untouched data.
    /// Returns false if the data cannot take another item.
    fn adopt(&mut self, item: EntityId) -> bool;

    /// Makes `item` part of the data after an explicit synchronization and
    /// returns the item it displaced, if any.
    fn synchronize(&mut self, item: EntityId) -> Option<EntityId>;
}

/// Data of a single-valued virtual endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectData(pub Option<EntityId>);

impl ObjectData {
    /// Returns the related entity.
    #[must_use]
    pub fn get(&self) -> Option<EntityId> {
        self.0
    }
}

impl EndpointData for ObjectData {
    fn from_items(items: Vec<EntityId>) -> Self {
        Self(items.into_iter().next())
    }

    fn items(&self) -> Vec<EntityId> {
        self.0.into_iter().collect()
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.0.as_ref() == Some(id)
    }

    fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    fn adopt(&mut self, item: EntityId) -> bool {
        if self.0.is_some() {
            return false;
        }
        self.0 = Some(item);
        true
    }

    fn synchronize(&mut self, item: EntityId) -> Option<EntityId> {
        self.0.replace(item)
    }
}

/// Ordered data of a collection endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionData(pub Vec<EntityId>);

impl CollectionData {
    /// Returns the items in order.
    #[must_use]
    pub fn as_slice(&self) -> &[EntityId] {
        &self.0
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the position of `id`.
    #[must_use]
    pub fn index_of(&self, id: &EntityId) -> Option<usize> {
        self.0.iter().position(|i| i == id)
    }
}

impl EndpointData for CollectionData {
    fn from_items(items: Vec<EntityId>) -> Self {
        Self(items)
    }

    fn items(&self) -> Vec<EntityId> {
        self.0.clone()
    }

    fn contains(&self, id: &EntityId) -> bool {
        self.0.contains(id)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn adopt(&mut self, _item: EntityId) -> bool {
        false
    }

    fn synchronize(&mut self, item: EntityId) -> Option<EntityId> {
        if !self.0.contains(&item) {
            self.0.push(item);
        }
        None
    }
}

/// The non-owning, lazily loaded side of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEndpoint<D> {
    id: RelationEndpointId,
    load: LoadState,
    current: D,
    original: D,
    registered: BTreeSet<EntityId>,
    unsynchronized: BTreeSet<EntityId>,
    touched: bool,
}

/// Single-valued virtual endpoint (1:1, non-owning side).
pub type VirtualObjectEndpoint = VirtualEndpoint<ObjectData>;

/// Multi-valued virtual endpoint (1:N, non-owning side).
pub type CollectionEndpoint = VirtualEndpoint<CollectionData>;

impl<D: EndpointData> VirtualEndpoint<D> {
    /// Creates an endpoint whose data still has to be loaded.
    #[must_use]
    pub fn incomplete(id: RelationEndpointId) -> Self {
        Self {
            id,
            load: LoadState::Incomplete,
            current: D::default(),
            original: D::default(),
            registered: BTreeSet::new(),
            unsynchronized: BTreeSet::new(),
            touched: false,
        }
    }

    /// Creates a complete, empty endpoint (used for new objects).
    #[must_use]
    pub fn complete_empty(id: RelationEndpointId) -> Self {
        Self {
            load: LoadState::Complete,
            ..Self::incomplete(id)
        }
    }

    /// Returns the endpoint ID.
    #[must_use]
    pub fn id(&self) -> RelationEndpointId {
        self.id
    }

    /// Returns the load state.
    #[must_use]
    pub fn load_state(&self) -> LoadState {
        self.load
    }

    /// Returns true once data has been loaded.
    #[must_use]
    pub fn is_data_complete(&self) -> bool {
        self.load == LoadState::Complete
    }

    /// Returns the current data. Empty while incomplete.
    #[must_use]
    pub fn current(&self) -> &D {
        &self.current
    }

    /// Returns the original data. Empty while incomplete.
    #[must_use]
    pub fn original(&self) -> &D {
        &self.original
    }

    /// Returns true if the current data differs from the original.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.current != self.original
    }

    /// Returns true if the endpoint was modified since load or commit.
    #[must_use]
    pub fn has_been_touched(&self) -> bool {
        self.touched
    }

    /// Real endpoints registered while the data was incomplete.
    #[must_use]
    pub fn registered_opposites(&self) -> &BTreeSet<EntityId> {
        &self.registered
    }

    /// Real endpoints that point here but are missing from the data.
    #[must_use]
    pub fn unsynchronized_opposites(&self) -> &BTreeSet<EntityId> {
        &self.unsynchronized
    }

    /// Returns true if some opposite endpoint is out of sync.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.unsynchronized.is_empty()
    }

    /// Returns true if the endpoint holds nothing worth keeping.
    #[must_use]
    pub fn can_be_collected(&self) -> bool {
        self.load == LoadState::Incomplete && self.registered.is_empty() && !self.touched
    }

    /// Records that the real endpoint of `item` references this endpoint.
    pub(crate) fn register_original_opposite(&mut self, item: EntityId) -> SyncState {
        match self.load {
            LoadState::Incomplete => {
                self.registered.insert(item);
                SyncState::Unknown
            }
            LoadState::Complete if self.original.contains(&item) => SyncState::Synchronized,
            LoadState::Complete => {
                if !self.touched && !self.has_changed() && self.original.adopt(item) {
                    self.current = self.original.clone();
                    SyncState::Synchronized
                } else {
                    self.unsynchronized.insert(item);
                    SyncState::Unsynchronized
                }
            }
        }
    }

    /// Drops the registration of `item`'s real endpoint.
    pub(crate) fn unregister_original_opposite(&mut self, item: &EntityId) {
        self.registered.remove(item);
        self.unsynchronized.remove(item);
    }

    /// Completes the endpoint with loaded items.
    ///
    /// Returns the registered opposites that turned out to be missing from
    /// the loaded data.
    pub(crate) fn mark_data_complete(&mut self, items: Vec<EntityId>) -> CoreResult<Vec<EntityId>> {
        if self.load == LoadState::Complete {
            return Err(CoreError::structural(format!(
                "endpoint {} is already complete",
                self.id
            )));
        }
        let data = D::from_items(items);
        let missing: Vec<EntityId> = self
            .registered
            .iter()
            .filter(|id| !data.contains(id))
            .copied()
            .collect();
        self.current = data.clone();
        self.original = data;
        self.registered.clear();
        self.unsynchronized = missing.iter().copied().collect();
        self.load = LoadState::Complete;
        Ok(missing)
    }

    /// Discards the loaded data so the next access loads it again.
    pub(crate) fn mark_data_incomplete(&mut self) -> CoreResult<()> {
        if self.load == LoadState::Incomplete {
            return Ok(());
        }
        if self.touched || self.has_changed() {
            return Err(CoreError::structural(format!(
                "endpoint {} has changes and cannot be unloaded",
                self.id
            )));
        }
        let mut registered: BTreeSet<EntityId> = self.original.items().into_iter().collect();
        registered.append(&mut self.unsynchronized);
        self.registered = registered;
        self.current = D::default();
        self.original = D::default();
        self.load = LoadState::Incomplete;
        Ok(())
    }

    /// Takes an unsynchronized opposite into the data.
    ///
    /// Returns the entity whose registration was displaced, which becomes
    /// unsynchronized in turn.
    pub(crate) fn synchronize_opposite(&mut self, item: EntityId) -> CoreResult<Option<EntityId>> {
        if !self.unsynchronized.remove(&item) {
            return Ok(None);
        }
        if self.has_changed() {
            self.unsynchronized.insert(item);
            return Err(CoreError::structural(format!(
                "endpoint {} has changes and cannot be synchronized",
                self.id
            )));
        }
        let displaced = self.original.synchronize(item);
        self.current = self.original.clone();
        if let Some(displaced) = displaced {
            self.unsynchronized.insert(displaced);
        }
        Ok(displaced)
    }

    pub(crate) fn set_current(&mut self, data: D) -> D {
        self.touched = true;
        std::mem::replace(&mut self.current, data)
    }

    pub(crate) fn commit(&mut self) {
        self.original = self.current.clone();
        self.touched = false;
    }

    pub(crate) fn rollback(&mut self) {
        self.current = self.original.clone();
        self.touched = false;
    }
}

impl VirtualEndpoint<ObjectData> {
    /// Returns the currently related entity.
    #[must_use]
    pub fn related(&self) -> Option<EntityId> {
        self.current.0
    }

    pub(crate) fn set_related(&mut self, related: Option<EntityId>) -> Option<EntityId> {
        self.set_current(ObjectData(related)).0
    }
}

impl VirtualEndpoint<CollectionData> {
    /// Returns the current items.
    #[must_use]
    pub fn items(&self) -> &[EntityId] {
        self.current.as_slice()
    }

    pub(crate) fn insert(&mut self, index: usize, item: EntityId) -> CoreResult<()> {
        if index > self.current.len() {
            return Err(CoreError::structural(format!(
                "index {index} out of range for {}",
                self.id
            )));
        }
        self.touched = true;
        self.current.0.insert(index, item);
        Ok(())
    }

    pub(crate) fn remove(&mut self, item: &EntityId) -> Option<usize> {
        let index = self.current.index_of(item)?;
        self.touched = true;
        self.current.0.remove(index);
        Some(index)
    }

    pub(crate) fn replace(&mut self, index: usize, item: EntityId) -> CoreResult<EntityId> {
        let id = self.id;
        let slot = self
            .current
            .0
            .get_mut(index)
            .ok_or_else(|| CoreError::structural(format!("index {index} out of range for {id}")))?;
        self.touched = true;
        Ok(std::mem::replace(slot, item))
    }
}

/// The endpoint of a relation pointing at nothing.
///
/// It has no state and every modification on it does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullEndpoint {
    definition: EndpointDefId,
}

impl NullEndpoint {
    /// Creates the null endpoint for a definition.
    #[must_use]
    pub const fn new(definition: EndpointDefId) -> Self {
        Self { definition }
    }

    /// Returns the null endpoint ID.
    #[must_use]
    pub const fn id(&self) -> RelationEndpointId {
        RelationEndpointId::null(self.definition)
    }

    /// A null endpoint is always complete.
    #[must_use]
    pub const fn is_data_complete(&self) -> bool {
        true
    }

    /// A null endpoint never relates anything.
    #[must_use]
    pub fn items(&self) -> Vec<EntityId> {
        Vec::new()
    }
}

/// One side of one relationship instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationEndpoint {
    /// Foreign-key owning side.
    Real(RealEndpoint),
    /// Single-valued virtual side.
    VirtualObject(VirtualObjectEndpoint),
    /// Multi-valued virtual side.
    Collection(CollectionEndpoint),
}

impl RelationEndpoint {
    /// Returns the endpoint ID.
    #[must_use]
    pub fn id(&self) -> RelationEndpointId {
        match self {
            Self::Real(e) => e.id(),
            Self::VirtualObject(e) => e.id(),
            Self::Collection(e) => e.id(),
        }
    }

    /// Returns true if the endpoint's data is loaded. Real endpoints always are.
    #[must_use]
    pub fn is_data_complete(&self) -> bool {
        match self {
            Self::Real(_) => true,
            Self::VirtualObject(e) => e.is_data_complete(),
            Self::Collection(e) => e.is_data_complete(),
        }
    }

    /// Returns true for virtual object and collection endpoints.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !matches!(self, Self::Real(_))
    }

    /// Returns true if the endpoint was modified since load or commit.
    #[must_use]
    pub fn has_been_touched(&self) -> bool {
        match self {
            Self::Real(e) => e.has_been_touched(),
            Self::VirtualObject(e) => e.has_been_touched(),
            Self::Collection(e) => e.has_been_touched(),
        }
    }

    /// Returns true if current and original data differ.
    #[must_use]
    pub fn has_changed(&self, records: &RecordMap) -> bool {
        match self {
            Self::Real(e) => e.has_changed(records),
            Self::VirtualObject(e) => e.has_changed(),
            Self::Collection(e) => e.has_changed(),
        }
    }

    /// Returns the currently related entities.
    #[must_use]
    pub fn related_ids(&self, records: &RecordMap) -> Vec<EntityId> {
        match self {
            Self::Real(e) => e.current(records).into_iter().collect(),
            Self::VirtualObject(e) => e.current().items(),
            Self::Collection(e) => e.current().items(),
        }
    }

    /// Returns the originally related entities.
    #[must_use]
    pub fn original_ids(&self, records: &RecordMap) -> Vec<EntityId> {
        match self {
            Self::Real(e) => e.original(records).into_iter().collect(),
            Self::VirtualObject(e) => e.original().items(),
            Self::Collection(e) => e.original().items(),
        }
    }

    pub(crate) fn original_items(&self) -> Vec<EntityId> {
        match self {
            Self::Real(_) => Vec::new(),
            Self::VirtualObject(e) => e.original().items(),
            Self::Collection(e) => e.original().items(),
        }
    }

    /// Returns the real endpoint variant.
    #[must_use]
    pub fn as_real(&self) -> Option<&RealEndpoint> {
        match self {
            Self::Real(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the virtual object variant.
    #[must_use]
    pub fn as_virtual_object(&self) -> Option<&VirtualObjectEndpoint> {
        match self {
            Self::VirtualObject(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the collection variant.
    #[must_use]
    pub fn as_collection(&self) -> Option<&CollectionEndpoint> {
        match self {
            Self::Collection(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn commit(&mut self) {
        match self {
            Self::Real(e) => e.reset_touched(),
            Self::VirtualObject(e) => e.commit(),
            Self::Collection(e) => e.commit(),
        }
    }

    pub(crate) fn rollback(&mut self) {
        match self {
            Self::Real(e) => e.reset_touched(),
            Self::VirtualObject(e) => e.rollback(),
            Self::Collection(e) => e.rollback(),
        }
    }

    pub(crate) fn register_original_opposite(&mut self, item: EntityId) -> SyncState {
        match self {
            Self::Real(_) => SyncState::Synchronized,
            Self::VirtualObject(e) => e.register_original_opposite(item),
            Self::Collection(e) => e.register_original_opposite(item),
        }
    }

    pub(crate) fn unregister_original_opposite(&mut self, item: &EntityId) {
        match self {
            Self::Real(_) => {}
            Self::VirtualObject(e) => e.unregister_original_opposite(item),
            Self::Collection(e) => e.unregister_original_opposite(item),
        }
    }

    pub(crate) fn can_be_collected(&self) -> bool {
        match self {
            Self::Real(_) => false,
            Self::VirtualObject(e) => e.can_be_collected(),
            Self::Collection(e) => e.can_be_collected(),
        }
    }

    pub(crate) fn mark_data_complete(&mut self, items: Vec<EntityId>) -> CoreResult<Vec<EntityId>> {
        match self {
            Self::Real(_) => Ok(Vec::new()),
            Self::VirtualObject(e) => e.mark_data_complete(items),
            Self::Collection(e) => e.mark_data_complete(items),
        }
    }

    pub(crate) fn mark_data_incomplete(&mut self) -> CoreResult<()> {
        match self {
            Self::Real(_) => Ok(()),
            Self::VirtualObject(e) => e.mark_data_incomplete(),
            Self::Collection(e) => e.mark_data_incomplete(),
        }
    }

    pub(crate) fn synchronize_opposite(&mut self, item: EntityId) -> CoreResult<Option<EntityId>> {
        match self {
            Self::Real(_) => Ok(None),
            Self::VirtualObject(e) => e.synchronize_opposite(item),
            Self::Collection(e) => e.synchronize_opposite(item),
        }
    }

    pub(crate) fn unsynchronized_opposites(&self) -> Vec<EntityId> {
        match self {
            Self::Real(_) => Vec::new(),
            Self::VirtualObject(e) => e.unsynchronized_opposites().iter().copied().collect(),
            Self::Collection(e) => e.unsynchronized_opposites().iter().copied().collect(),
        }
    }
}
