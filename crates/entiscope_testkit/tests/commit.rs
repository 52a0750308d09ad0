//! Commit and rollback against the seeded store.

use entiscope_core::Config;
use entiscope_testkit::prelude::*;
use proptest::prelude::*;

#[test]
fn new_item_added_to_mandatory_collection_is_persisted() {
    init_tracing();
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let item = tx.new_entity(seeded.model.order_item).unwrap();
    tx.set_value(item, "product", "nut").unwrap();
    tx.set_value(item, "quantity", 12i64).unwrap();
    tx.add_related(seeded.second, "items", item).unwrap();
    assert_eq!(tx.state(item).unwrap(), RecordState::New);

    tx.commit().unwrap();

    assert_eq!(tx.state(item).unwrap(), RecordState::Unchanged);
    assert!(!tx.has_changes().unwrap());
    assert_eq!(seeded.stored(item, "order"), Some(Value::Reference(seeded.second)));
    assert_eq!(seeded.stored(item, "product"), Some(Value::text("nut")));

    let mut fresh = factory.create_root();
    let mut reader = fresh.root();
    let items = reader.get_related_collection(seeded.second, "items").unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.contains(&item) && items.contains(&seeded.bolt));
}

#[test]
fn mandatory_relation_violation_persists_nothing() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_value(seeded.ada, "name", "Ada Lovelace").unwrap();
    tx.set_value(seeded.first, "number", 100i64).unwrap();
    let orphan = tx.new_entity(seeded.model.order_item).unwrap();
    tx.set_value(orphan, "product", "orphan").unwrap();
    tx.set_value(orphan, "quantity", 1i64).unwrap();

    let err = tx.commit().unwrap_err();

    assert_eq!(err, CoreError::mandatory_relation(orphan, "order"));
    assert_eq!(seeded.stored(seeded.ada, "name"), Some(Value::text("Ada")));
    assert_eq!(seeded.stored(seeded.first, "number"), Some(Value::Int(1)));
    assert!(!seeded.store.contains(orphan));
    assert_eq!(seeded.store.stats().persists(), 0);
    // the transaction keeps its changes for a retry
    assert_eq!(tx.state(seeded.ada).unwrap(), RecordState::Changed);
    assert_eq!(tx.state(orphan).unwrap(), RecordState::New);
}

#[test]
fn emptied_mandatory_collection_fails_commit() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_related(seeded.bolt, "order", Some(seeded.first)).unwrap();

    let err = tx.commit().unwrap_err();
    assert_eq!(err, CoreError::mandatory_relation(seeded.second, "items"));
    assert_eq!(seeded.stored(seeded.bolt, "order"), Some(Value::Reference(seeded.second)));
}

#[test]
fn disabled_relation_validation_lets_orphans_through() {
    let seeded = seeded();
    let factory = seeded.factory_with(Config::new().validate_mandatory_relations(false));
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let orphan = tx.new_entity(seeded.model.order_item).unwrap();
    tx.set_value(orphan, "product", "orphan").unwrap();
    tx.set_value(orphan, "quantity", 1i64).unwrap();
    tx.commit().unwrap();

    assert_eq!(seeded.stored(orphan, "order"), Some(Value::Null));
}

#[test]
fn null_mandatory_property_fails_commit() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let customer = tx.new_entity(seeded.model.customer).unwrap();
    let err = tx.commit().unwrap_err();

    assert_eq!(
        err,
        CoreError::MandatoryProperty {
            id: customer,
            property: "name".into()
        }
    );
}

#[test]
fn concurrent_store_update_is_detected() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_value(seeded.ada, "name", "Countess").unwrap();
    seeded.store.touch(seeded.ada).unwrap();

    let err = tx.commit().unwrap_err();
    assert_eq!(err, CoreError::ConcurrencyViolation { id: seeded.ada });
    assert_eq!(seeded.stored(seeded.ada, "name"), Some(Value::text("Ada")));
}

#[test]
fn mark_changed_bumps_stored_timestamp() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let before = seeded.store.row(seeded.bob).unwrap().timestamp;

    tx.mark_changed(seeded.bob).unwrap();
    assert!(tx.has_changes().unwrap());
    tx.commit().unwrap();

    let row = seeded.store.row(seeded.bob).unwrap();
    assert!(row.timestamp > before);
    assert_eq!(row.values, vec![Value::text("Bob")]);
    assert_eq!(tx.data().unwrap().record(seeded.bob).unwrap().timestamp(), Some(row.timestamp));
}

#[test]
fn committed_deletion_removes_row() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.delete(seeded.gadget).unwrap();
    assert_eq!(tx.get_related_collection(seeded.first, "items").unwrap(), vec![seeded.widget]);
    tx.commit().unwrap();

    assert!(!seeded.store.contains(seeded.gadget));
    assert_eq!(tx.state(seeded.gadget).unwrap(), RecordState::Invalid);
    assert_eq!(seeded.store.stats().records_deleted(), 1);
}

#[test]
fn rollback_restores_values_and_relations() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_value(seeded.ada, "name", "Augusta").unwrap();
    tx.set_related(seeded.widget, "order", Some(seeded.second)).unwrap();
    tx.set_related(seeded.clerk, "supervisor", None).unwrap();
    let created = tx.new_entity(seeded.model.order).unwrap();

    tx.rollback().unwrap();

    assert_eq!(tx.get_value(seeded.ada, "name").unwrap(), Value::text("Ada"));
    assert_eq!(tx.get_related(seeded.widget, "order").unwrap(), Some(seeded.first));
    assert_eq!(tx.get_related_collection(seeded.second, "items").unwrap(), vec![seeded.bolt]);
    assert_eq!(tx.get_related(seeded.clerk, "supervisor").unwrap(), Some(seeded.boss));
    assert_eq!(tx.state(created).unwrap(), RecordState::Invalid);
    assert!(!tx.has_changes().unwrap());
}

#[test]
fn second_rollback_is_silent() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    let log = EventLog::new();
    log.attach(&mut tx).unwrap();

    tx.set_value(seeded.first, "number", 9i64).unwrap();
    tx.add_related(seeded.bob, "orders", seeded.second).unwrap();
    tx.rollback().unwrap();
    assert_eq!(log.count(EventKind::RolledBack), 1);
    log.clear();

    tx.rollback().unwrap();

    assert!(log.is_empty());
    assert_eq!(log.change_notifications(), 0);
    assert_eq!(tx.get_value(seeded.first, "number").unwrap(), Value::Int(1));
}

#[test]
fn commit_raises_phases_in_order() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    tx.set_value(seeded.boss, "name", "Ada Grace").unwrap();
    let log = EventLog::new();
    log.attach(&mut tx).unwrap();

    tx.commit().unwrap();

    let phases: Vec<EventKind> = log
        .kinds()
        .into_iter()
        .filter(|k| {
            matches!(
                k,
                EventKind::Committing | EventKind::CommitValidate | EventKind::Committed
            )
        })
        .collect();
    assert_eq!(
        phases,
        vec![EventKind::Committing, EventKind::CommitValidate, EventKind::Committed]
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn rollback_round_trips_any_script(script in mutation_script_strategy(8)) {
        let seeded = seeded();
        let factory = seeded.factory();
        let mut hierarchy = factory.create_root();
        let mut tx = hierarchy.root();
        let all = seeded.all();
        let before = snapshot(&mut tx, &seeded.model.mapping, &all).unwrap();

        let mut created = Vec::new();
        for mutation in &script {
            if let Ok(Some(id)) = mutation.apply(&mut tx, &seeded) {
                created.push(id);
            }
        }
        tx.rollback().unwrap();

        prop_assert!(!tx.has_changes().unwrap());
        let data = tx.data().unwrap();
        for id in &all {
            let record = data.record(*id).unwrap();
            prop_assert!(!record.has_been_touched(), "{} still touched", id);
        }
        for id in &created {
            prop_assert_eq!(tx.state(*id).unwrap(), RecordState::Invalid);
        }
        let after = snapshot(&mut tx, &seeded.model.mapping, &all).unwrap();
        prop_assert_eq!(before, after);
        prop_assert_eq!(seeded.store.stats().persists(), 0);
    }
}
