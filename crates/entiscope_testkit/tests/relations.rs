//! Relation properties: both sides of one-to-many and one-to-one
//! relations, unidirectional references and typed property access.

use entiscope_core::{
    CoreResult, ExtensionFactory, TransactionExtension, TransactionId, TransactionKind,
};
use entiscope_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn foreign_key_change_moves_item_between_collections() {
    init_tracing();
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_related(seeded.widget, "order", Some(seeded.second)).unwrap();

    assert_eq!(tx.get_related_collection(seeded.first, "items").unwrap(), vec![seeded.gadget]);
    let second = tx.get_related_collection(seeded.second, "items").unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.contains(&seeded.widget));
    assert_eq!(tx.get_original_related(seeded.widget, "order").unwrap(), Some(seeded.first));
    assert_eq!(tx.get_original_collection(seeded.second, "items").unwrap(), vec![seeded.bolt]);
    assert_eq!(tx.state(seeded.widget).unwrap(), RecordState::Changed);
}

#[test]
fn collection_operations_update_foreign_keys() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.add_related(seeded.bob, "orders", seeded.first).unwrap();
    assert_eq!(tx.get_related(seeded.first, "customer").unwrap(), Some(seeded.bob));
    assert_eq!(tx.get_related_collection(seeded.ada, "orders").unwrap(), vec![seeded.second]);

    tx.insert_related(seeded.bob, "orders", 0, seeded.second).unwrap();
    assert_eq!(
        tx.get_related_collection(seeded.bob, "orders").unwrap(),
        vec![seeded.second, seeded.first]
    );
    assert!(tx.get_related_collection(seeded.ada, "orders").unwrap().is_empty());

    tx.remove_related(seeded.bob, "orders", seeded.second).unwrap();
    assert_eq!(tx.get_related(seeded.second, "customer").unwrap(), None);

    tx.replace_related(seeded.bob, "orders", 0, seeded.second).unwrap();
    assert_eq!(tx.get_related(seeded.first, "customer").unwrap(), None);
    assert_eq!(tx.get_related(seeded.second, "customer").unwrap(), Some(seeded.bob));

    tx.set_related_collection(seeded.ada, "orders", vec![seeded.first, seeded.second])
        .unwrap();
    assert!(tx.get_related_collection(seeded.bob, "orders").unwrap().is_empty());
    assert_eq!(tx.get_related(seeded.first, "customer").unwrap(), Some(seeded.ada));
    assert_eq!(tx.get_related(seeded.second, "customer").unwrap(), Some(seeded.ada));
}

#[test]
fn duplicate_collection_entries_are_rejected() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let err = tx
        .set_related_collection(seeded.bob, "orders", vec![seeded.first, seeded.first])
        .unwrap_err();
    assert!(matches!(err, CoreError::StructuralMisuse { .. }));
    assert!(!tx.has_changes().unwrap());
}

#[test]
fn one_to_one_keeps_both_sides_in_step() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.set_related(seeded.second, "ticket", Some(seeded.ticket)).unwrap();

    assert_eq!(tx.get_related(seeded.ticket, "order").unwrap(), Some(seeded.second));
    assert_eq!(tx.get_related(seeded.first, "ticket").unwrap(), None);
    assert_eq!(tx.get_related(seeded.second, "ticket").unwrap(), Some(seeded.ticket));

    tx.commit().unwrap();
    assert_eq!(
        seeded.stored(seeded.ticket, "order"),
        Some(Value::Reference(seeded.second))
    );
}

#[test]
fn one_to_one_replacement_releases_previous_owner() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let fresh = tx.new_entity(seeded.model.order_ticket).unwrap();
    tx.set_value(fresh, "code", "T-2").unwrap();
    tx.set_related(seeded.first, "ticket", Some(fresh)).unwrap();

    assert_eq!(tx.get_related(seeded.ticket, "order").unwrap(), None);
    assert_eq!(tx.get_related(fresh, "order").unwrap(), Some(seeded.first));
}

#[test]
fn unidirectional_reference_has_no_opposite() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    assert_eq!(tx.get_related(seeded.clerk, "supervisor").unwrap(), Some(seeded.boss));
    tx.set_related(seeded.boss, "supervisor", Some(seeded.clerk)).unwrap();
    tx.set_related(seeded.clerk, "supervisor", None).unwrap();
    tx.commit().unwrap();

    assert_eq!(seeded.stored(seeded.clerk, "supervisor"), Some(Value::Null));
    assert_eq!(
        seeded.stored(seeded.boss, "supervisor"),
        Some(Value::Reference(seeded.clerk))
    );
    assert_eq!(seeded.store.stats().related_loads(), 0);
}

#[test]
fn target_of_wrong_class_is_rejected() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let err = tx.set_related(seeded.widget, "order", Some(seeded.ada)).unwrap_err();
    assert!(matches!(err, CoreError::StructuralMisuse { .. }));
    assert_eq!(tx.get_related(seeded.widget, "order").unwrap(), Some(seeded.first));
}

#[test]
fn deleted_target_cannot_be_referenced() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    tx.delete(seeded.boss).unwrap();
    assert_eq!(tx.get_related(seeded.clerk, "supervisor").unwrap(), Some(seeded.boss));
    let err = tx.set_related(seeded.clerk, "supervisor", Some(seeded.boss)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::ObjectDeleted { .. } | CoreError::ObjectInvalid { .. }
    ));
    let err = tx.get_value(seeded.boss, "name").unwrap_err();
    assert_eq!(err, CoreError::ObjectDeleted { id: seeded.boss });
}

#[test]
fn property_kinds_are_checked() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();

    let err = tx.set_value(seeded.first, "number", "one").unwrap_err();
    assert!(matches!(err, CoreError::StructuralMisuse { .. }));
    let err = tx.set_value(seeded.first, "colour", 1i64).unwrap_err();
    assert!(matches!(err, CoreError::UnknownProperty { .. }));
    let err = tx.set_value(seeded.first, "customer", Value::Reference(seeded.bob));
    assert!(err.is_err());

    tx.set_value(seeded.first, "number", 5i64).unwrap();
    assert_eq!(tx.get_value(seeded.first, "number").unwrap(), Value::Int(5));
    assert_eq!(tx.get_original_value(seeded.first, "number").unwrap(), Value::Int(1));
}

#[test]
fn veto_cancels_a_change() {
    let seeded = seeded();
    let factory = seeded.factory();
    let mut hierarchy = factory.create_root();
    let mut tx = hierarchy.root();
    tx.events().unwrap().subscribe(Some(EventKind::ObjectDeleting), |_| {
        Err(CoreError::Vetoed {
            reason: "orders are archived, not deleted".into(),
        })
    });

    let err = tx.delete(seeded.first).unwrap_err();
    assert!(matches!(err, CoreError::Vetoed { .. }));
    assert_eq!(tx.state(seeded.first).unwrap(), RecordState::Unchanged);
}

/// Rejects negative quantities.
struct QuantityGuard;

impl TransactionExtension for QuantityGuard {
    fn key(&self) -> &str {
        "quantity-guard"
    }

    fn on_event(&mut self, _: TransactionId, event: &mut TransactionEvent) -> CoreResult<()> {
        match event {
            TransactionEvent::PropertyValueChanging { property, new, .. }
                if property.as_str() == "quantity" && new.as_int().is_some_and(|q| q < 0) =>
            {
                Err(CoreError::Vetoed {
                    reason: format!("negative quantity {new}"),
                })
            }
            _ => Ok(()),
        }
    }
}

struct QuantityGuards;

impl ExtensionFactory for QuantityGuards {
    fn create(&self, _: TransactionId, _: TransactionKind) -> Vec<Box<dyn TransactionExtension>> {
        vec![Box::new(QuantityGuard)]
    }
}

#[test]
fn extensions_apply_to_sub_transactions() {
    let seeded = seeded();
    let factory = seeded.factory().with_extension(Arc::new(QuantityGuards));
    let mut hierarchy = factory.create_root();
    let mut root = hierarchy.root();
    let mut sub = root.create_sub().unwrap();

    let err = sub.set_value(seeded.bolt, "quantity", -1i64).unwrap_err();
    assert!(matches!(err, CoreError::Vetoed { .. }));
    sub.set_value(seeded.bolt, "quantity", 11i64).unwrap();
    assert_eq!(sub.events().unwrap().extension_keys(), vec!["quantity-guard"]);
}
