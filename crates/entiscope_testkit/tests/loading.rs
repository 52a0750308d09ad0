//! Loading, lazy relation endpoints and unloading.

use entiscope_core::{EntityStateRecord, RelationEndpointId, SyncState};
use entiscope_testkit::prelude::*;

#[test]
fn repeated_get_or_load_returns_same_record() {
    init_tracing();
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let first: *const EntityStateRecord = tx.get_or_load(seeded.ada).unwrap();
    let second: *const EntityStateRecord = tx.get_or_load(seeded.ada).unwrap();

    assert_eq!(first, second);
    assert_eq!(seeded.store.stats().record_loads(), 1);
    assert_eq!(tx.state(seeded.ada).unwrap(), RecordState::Unchanged);
}

#[test]
fn missing_entity_is_reported() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let ghost = EntityId::new(seeded.model.customer);

    assert!(tx.try_get_or_load(ghost).unwrap().is_none());
    let err = tx.get_or_load(ghost).unwrap_err();
    assert_eq!(err, CoreError::NotFound { id: ghost });
    assert_eq!(tx.state(ghost).unwrap(), RecordState::NotLoadedYet);
}

#[test]
fn enlist_defers_loading() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    assert!(tx.enlist(seeded.bob).unwrap());
    assert!(!tx.enlist(seeded.bob).unwrap());
    assert_eq!(tx.state(seeded.bob).unwrap(), RecordState::NotLoadedYet);
    assert_eq!(seeded.store.stats().record_loads(), 0);

    tx.ensure_data_available(seeded.bob).unwrap();
    assert_eq!(tx.state(seeded.bob).unwrap(), RecordState::Unchanged);
    assert_eq!(seeded.store.stats().record_loads(), 1);
}

#[test]
fn lazy_collection_loads_once() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let items = seeded.items_of(seeded.first);

    tx.get_or_load(seeded.first).unwrap();
    let endpoint = tx.relation_endpoint(items, LoadPolicy::MinimumLoading).unwrap();
    assert!(!endpoint.unwrap().is_data_complete());
    let before = seeded.store.stats().snapshot();

    let loaded = tx.get_related_collection(seeded.first, "items").unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.contains(&seeded.widget) && loaded.contains(&seeded.gadget));
    let after_first = seeded.store.stats().snapshot();
    assert_eq!(after_first.related_loads, before.related_loads + 1);
    let endpoint = tx.relation_endpoint(items, LoadPolicy::WithoutLoading).unwrap();
    assert!(endpoint.unwrap().is_data_complete());

    tx.get_related_collection(seeded.first, "items").unwrap();
    assert_eq!(seeded.store.stats().snapshot(), after_first);
}

#[test]
fn registering_real_endpoint_leaves_opposite_incomplete() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let items = seeded.items_of(seeded.first);

    tx.get_or_load(seeded.widget).unwrap();
    assert_eq!(tx.get_related(seeded.widget, "order").unwrap(), Some(seeded.first));

    let endpoint = tx.relation_endpoint(items, LoadPolicy::WithoutLoading).unwrap();
    let endpoint = endpoint.unwrap();
    assert!(!endpoint.is_data_complete());
    assert!(endpoint.as_collection().unwrap().registered_opposites().contains(&seeded.widget));
    assert_eq!(seeded.store.stats().related_loads(), 0);

    let loaded = tx.get_related_collection(seeded.first, "items").unwrap();
    assert!(loaded.contains(&seeded.widget));
    assert_eq!(
        tx.relation_sync_state(seeded.widget, "order").unwrap(),
        SyncState::Synchronized
    );
}

#[test]
fn in_memory_foreign_key_wins_over_store() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.get_or_load(seeded.bolt).unwrap();
    // another writer moves the bolt to the first order
    seeded
        .store
        .update(seeded.bolt, 2, Value::Reference(seeded.first))
        .unwrap();

    let first_items = tx.get_related_collection(seeded.first, "items").unwrap();
    assert!(!first_items.contains(&seeded.bolt));
    assert_eq!(tx.get_related(seeded.bolt, "order").unwrap(), Some(seeded.second));

    let second_items = tx.get_related_collection(seeded.second, "items").unwrap();
    assert!(second_items.is_empty());
    assert_eq!(
        tx.relation_sync_state(seeded.bolt, "order").unwrap(),
        SyncState::Unsynchronized
    );
    let err = tx.set_related(seeded.bolt, "order", Some(seeded.first)).unwrap_err();
    assert!(matches!(err, CoreError::RelationOutOfSync { .. }));

    tx.synchronize_relation(seeded.bolt, "order").unwrap();
    assert_eq!(
        tx.relation_sync_state(seeded.bolt, "order").unwrap(),
        SyncState::Synchronized
    );
    assert_eq!(
        tx.get_related_collection(seeded.second, "items").unwrap(),
        vec![seeded.bolt]
    );
}

#[test]
fn single_valued_endpoint_is_seeded_by_its_real_side() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.get_or_load(seeded.ticket).unwrap();
    let ticket_end = RelationEndpointId::new(seeded.first, seeded.model.order_ticket_end);

    let endpoint = tx.relation_endpoint(ticket_end, LoadPolicy::WithoutLoading).unwrap();
    assert!(endpoint.unwrap().is_data_complete());
    assert_eq!(tx.get_related(seeded.first, "ticket").unwrap(), Some(seeded.ticket));
    assert_eq!(seeded.store.stats().related_loads(), 0);

    assert_eq!(tx.get_related(seeded.second, "ticket").unwrap(), None);
    assert_eq!(seeded.store.stats().related_loads(), 1);
}

#[test]
fn unload_respects_registration_order() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let log = EventLog::new();
    log.attach(&mut tx).unwrap();

    tx.get_or_load(seeded.ada).unwrap();
    tx.get_or_load(seeded.bob).unwrap();
    tx.get_or_load(seeded.boss).unwrap();
    log.clear();

    tx.unload(&[seeded.boss, seeded.ada]).unwrap();

    let events = log.events();
    assert_eq!(
        events[0].event,
        TransactionEvent::ObjectsUnloading {
            ids: vec![seeded.ada, seeded.boss]
        }
    );
    assert_eq!(
        events.last().unwrap().event,
        TransactionEvent::ObjectsUnloaded {
            ids: vec![seeded.boss, seeded.ada]
        }
    );
    assert_eq!(tx.state(seeded.ada).unwrap(), RecordState::NotLoadedYet);
    assert_eq!(tx.state(seeded.bob).unwrap(), RecordState::Unchanged);
}

#[test]
fn changed_objects_block_unload() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.get_or_load(seeded.bob).unwrap();
    tx.set_value(seeded.ada, "name", "Ada L.").unwrap();

    let err = tx.unload(&[seeded.ada, seeded.bob]).unwrap_err();
    assert!(matches!(err, CoreError::StructuralMisuse { .. }));
    assert_eq!(tx.state(seeded.bob).unwrap(), RecordState::Unchanged);

    let unloaded = tx.unload_all().unwrap();
    assert_eq!(unloaded, vec![seeded.bob]);
    assert_eq!(tx.state(seeded.ada).unwrap(), RecordState::Changed);
    assert_eq!(tx.get_value(seeded.ada, "name").unwrap(), Value::text("Ada L."));
}

#[test]
fn unloaded_relation_reloads_on_next_access() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let orders = seeded.orders_of(seeded.ada);

    tx.get_related_collection(seeded.ada, "orders").unwrap();
    let loads = seeded.store.stats().related_loads();

    tx.unload_relation(orders).unwrap();
    let endpoint = tx.relation_endpoint(orders, LoadPolicy::WithoutLoading).unwrap();
    assert!(endpoint.map_or(true, |e| !e.is_data_complete()));

    assert_eq!(tx.get_related_collection(seeded.ada, "orders").unwrap().len(), 2);
    assert_eq!(seeded.store.stats().related_loads(), loads + 1);
}
