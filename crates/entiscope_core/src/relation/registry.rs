//! Registry of the relation endpoints known to one transaction.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::mapping::Cardinality;
use crate::relation::endpoint::{
    CollectionEndpoint, RealEndpoint, RelationEndpoint, SyncState, VirtualObjectEndpoint,
};
use crate::relation::id::RelationEndpointId;
use crate::types::EndpointDefId;
use std::collections::BTreeMap;

/// Keyed map of every endpoint registered in a transaction.
///
/// Keys are unique; registering an ID twice is a structural error. Endpoints
/// of one entity are adjacent in key order, which keeps per-entity scans cheap.
#[derive(Debug, Default)]
pub struct RelationEndpointRegistry {
    endpoints: BTreeMap<RelationEndpointId, RelationEndpoint>,
}

impl RelationEndpointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &RelationEndpointId) -> bool {
        self.endpoints.contains_key(id)
    }

    /// Returns the endpoint registered under `id`.
    #[must_use]
    pub fn get(&self, id: &RelationEndpointId) -> Option<&RelationEndpoint> {
        self.endpoints.get(id)
    }

    /// Iterates over all endpoints in key order.
    pub fn iter(&self) -> impl Iterator<Item = &RelationEndpoint> {
        self.endpoints.values()
    }

    /// Returns the IDs of every endpoint owned by `entity`.
    #[must_use]
    pub fn endpoints_of(&self, entity: EntityId) -> Vec<RelationEndpointId> {
        let from = RelationEndpointId::new(entity, EndpointDefId::new(0));
        let to = RelationEndpointId::new(entity, EndpointDefId::new(u32::MAX));
        self.endpoints.range(from..=to).map(|(id, _)| *id).collect()
    }

    /// Returns the IDs of endpoints matching `filter`.
    #[must_use]
    pub fn ids_where(&self, filter: impl Fn(&RelationEndpoint) -> bool) -> Vec<RelationEndpointId> {
        self.endpoints
            .iter()
            .filter(|(_, e)| filter(e))
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn get_mut(&mut self, id: &RelationEndpointId) -> Option<&mut RelationEndpoint> {
        self.endpoints.get_mut(id)
    }

    pub(crate) fn register(&mut self, endpoint: RelationEndpoint) -> CoreResult<()> {
        let id = endpoint.id();
        if id.is_null() {
            return Err(CoreError::structural(format!(
                "null endpoint {id} cannot be registered"
            )));
        }
        if self.endpoints.contains_key(&id) {
            return Err(CoreError::structural(format!(
                "endpoint {id} is already registered"
            )));
        }
        self.endpoints.insert(id, endpoint);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &RelationEndpointId) -> Option<RelationEndpoint> {
        self.endpoints.remove(id)
    }

    /// Returns the virtual endpoint `id`, registering an incomplete one if it
    /// is not known yet.
    pub(crate) fn get_or_create_virtual(
        &mut self,
        id: RelationEndpointId,
        cardinality: Cardinality,
    ) -> CoreResult<&mut RelationEndpoint> {
        if id.is_null() {
            return Err(CoreError::structural(format!(
                "null endpoint {id} has no state"
            )));
        }
        let endpoint = self.endpoints.entry(id).or_insert_with(|| match cardinality {
            Cardinality::One => RelationEndpoint::VirtualObject(VirtualObjectEndpoint::incomplete(id)),
            Cardinality::Many => RelationEndpoint::Collection(CollectionEndpoint::incomplete(id)),
        });
        if !endpoint.is_virtual() {
            return Err(CoreError::structural(format!("endpoint {id} is not virtual")));
        }
        Ok(endpoint)
    }

    pub(crate) fn real_mut(&mut self, id: &RelationEndpointId) -> CoreResult<&mut RealEndpoint> {
        match self.endpoints.get_mut(id) {
            Some(RelationEndpoint::Real(e)) => Ok(e),
            Some(_) => Err(CoreError::structural(format!("endpoint {id} is not a real endpoint"))),
            None => Err(CoreError::structural(format!("endpoint {id} is not registered"))),
        }
    }

    pub(crate) fn object_mut(
        &mut self,
        id: &RelationEndpointId,
    ) -> CoreResult<&mut VirtualObjectEndpoint> {
        match self.endpoints.get_mut(id) {
            Some(RelationEndpoint::VirtualObject(e)) => Ok(e),
            Some(_) => Err(CoreError::structural(format!(
                "endpoint {id} is not single-valued"
            ))),
            None => Err(CoreError::structural(format!("endpoint {id} is not registered"))),
        }
    }

    pub(crate) fn collection_mut(
        &mut self,
        id: &RelationEndpointId,
    ) -> CoreResult<&mut CollectionEndpoint> {
        match self.endpoints.get_mut(id) {
            Some(RelationEndpoint::Collection(e)) => Ok(e),
            Some(_) => Err(CoreError::structural(format!(
                "endpoint {id} is not a collection"
            ))),
            None => Err(CoreError::structural(format!("endpoint {id} is not registered"))),
        }
    }

    /// Updates the sync state of a registered real endpoint. Unknown IDs are
    /// ignored since the owning record may have been unloaded.
    pub(crate) fn set_sync_state(&mut self, id: &RelationEndpointId, sync: SyncState) {
        if let Some(RelationEndpoint::Real(e)) = self.endpoints.get_mut(id) {
            e.set_sync_state(sync);
        }
    }

    pub(crate) fn commit_all(&mut self) {
        for endpoint in self.endpoints.values_mut() {
            endpoint.commit();
        }
    }

    pub(crate) fn rollback_all(&mut self) {
        for endpoint in self.endpoints.values_mut() {
            endpoint.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassId;

    fn entity() -> EntityId {
        EntityId::new(ClassId::new(1))
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = RelationEndpointRegistry::new();
        let id = RelationEndpointId::new(entity(), EndpointDefId::new(1));
        registry
            .register(RelationEndpoint::Real(RealEndpoint::new(id, 0, SyncState::Synchronized)))
            .unwrap();
        let again = registry.register(RelationEndpoint::Real(RealEndpoint::new(
            id,
            0,
            SyncState::Synchronized,
        )));
        assert!(matches!(again, Err(CoreError::StructuralMisuse { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_or_create_virtual_is_idempotent() {
        let mut registry = RelationEndpointRegistry::new();
        let id = RelationEndpointId::new(entity(), EndpointDefId::new(2));
        assert!(!registry
            .get_or_create_virtual(id, Cardinality::Many)
            .unwrap()
            .is_data_complete());
        registry.get_or_create_virtual(id, Cardinality::Many).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.collection_mut(&id).is_ok());
        assert!(registry.object_mut(&id).is_err());
    }

    #[test]
    fn endpoints_of_entity() {
        let mut registry = RelationEndpointRegistry::new();
        let (a, b) = (entity(), entity());
        for def in [1, 2, 4] {
            registry
                .get_or_create_virtual(RelationEndpointId::new(a, EndpointDefId::new(def)), Cardinality::One)
                .unwrap();
        }
        registry
            .get_or_create_virtual(RelationEndpointId::new(b, EndpointDefId::new(1)), Cardinality::One)
            .unwrap();

        let of_a = registry.endpoints_of(a);
        assert_eq!(of_a.len(), 3);
        assert!(of_a.iter().all(|id| id.entity() == Some(a)));
    }

    #[test]
    fn null_endpoints_are_never_registered() {
        let mut registry = RelationEndpointRegistry::new();
        let null = RelationEndpointId::null(EndpointDefId::new(1));
        assert!(registry.get_or_create_virtual(null, Cardinality::One).is_err());
        assert!(registry.is_empty());
    }
}
