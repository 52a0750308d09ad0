//! Property-based test generators using proptest.
//!
//! Provides strategies for property values and for scripts of mutations
//! against the seeded order book.

use crate::fixtures::Seeded;
use entiscope_core::{CoreResult, EntityId, Transaction, Value, ValueKind};
use proptest::prelude::*;

/// Strategy for non-null values of `kind`. References are not generated.
pub fn value_strategy(kind: ValueKind) -> BoxedStrategy<Value> {
    match kind {
        ValueKind::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        ValueKind::Int => any::<i64>().prop_map(Value::Int).boxed(),
        ValueKind::Text => name_strategy().prop_map(Value::Text).boxed(),
        ValueKind::Bytes => prop::collection::vec(any::<u8>(), 0..32)
            .prop_map(Value::Bytes)
            .boxed(),
        ValueKind::Reference => Just(Value::Null).boxed(),
    }
}

/// Strategy for short names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9 ]{0,15}").expect("Invalid regex")
}

/// One change to the seeded order book.
///
/// Indices pick seeded entities modulo the number available, so every
/// generated mutation addresses a real entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Sets a customer's name.
    RenameCustomer {
        /// Customer index.
        customer: usize,
        /// New name.
        name: String,
    },
    /// Sets an order's number.
    Renumber {
        /// Order index.
        order: usize,
        /// New number.
        number: i64,
    },
    /// Sets an item's quantity.
    SetQuantity {
        /// Item index.
        item: usize,
        /// New quantity.
        quantity: i64,
    },
    /// Moves an item to another order through its foreign key.
    MoveItem {
        /// Item index.
        item: usize,
        /// Target order index.
        order: usize,
    },
    /// Moves an order to another customer through the customer's collection.
    ReassignOrder {
        /// Order index.
        order: usize,
        /// Target customer index.
        customer: usize,
    },
    /// Clears an order's customer.
    DetachOrder {
        /// Order index.
        order: usize,
    },
    /// Creates an item and appends it to an order.
    AddItem {
        /// Order index.
        order: usize,
        /// Product name.
        product: String,
        /// Quantity.
        quantity: i64,
    },
    /// Deletes an item.
    DeleteItem {
        /// Item index.
        item: usize,
    },
    /// Moves the ticket to another order.
    MoveTicket {
        /// Target order index.
        order: usize,
    },
    /// Sets or clears the clerk's supervisor.
    Supervise {
        /// Whether the clerk reports to the boss afterwards.
        supervised: bool,
    },
    /// Forces an entity into the commit set.
    MarkChanged {
        /// Index into every seeded entity.
        entity: usize,
    },
}

impl Mutation {
    /// Applies the mutation through `tx`.
    ///
    /// Returns the ID of a created entity, if any. Mutations addressing an
    /// entity deleted earlier in a script fail with the engine's error.
    pub fn apply(&self, tx: &mut Transaction<'_>, seeded: &Seeded) -> CoreResult<Option<EntityId>> {
        let customers = [seeded.ada, seeded.bob];
        let orders = [seeded.first, seeded.second];
        let items = [seeded.widget, seeded.gadget, seeded.bolt];
        let all = seeded.all();
        match self {
            Self::RenameCustomer { customer, name } => {
                tx.set_value(pick(&customers, *customer), "name", Value::text(name.as_str()))?
            }
            Self::Renumber { order, number } => {
                tx.set_value(pick(&orders, *order), "number", *number)?
            }
            Self::SetQuantity { item, quantity } => {
                tx.set_value(pick(&items, *item), "quantity", *quantity)?
            }
            Self::MoveItem { item, order } => {
                tx.set_related(pick(&items, *item), "order", Some(pick(&orders, *order)))?
            }
            Self::ReassignOrder { order, customer } => {
                tx.add_related(pick(&customers, *customer), "orders", pick(&orders, *order))?
            }
            Self::DetachOrder { order } => tx.set_related(pick(&orders, *order), "customer", None)?,
            Self::AddItem {
                order,
                product,
                quantity,
            } => {
                let item = tx.new_entity(seeded.model.order_item)?;
                tx.set_value(item, "product", Value::text(product.as_str()))?;
                tx.set_value(item, "quantity", *quantity)?;
                tx.add_related(pick(&orders, *order), "items", item)?;
                return Ok(Some(item));
            }
            Self::DeleteItem { item } => tx.delete(pick(&items, *item))?,
            Self::MoveTicket { order } => {
                tx.set_related(seeded.ticket, "order", Some(pick(&orders, *order)))?
            }
            Self::Supervise { supervised } => {
                let supervisor = supervised.then_some(seeded.boss);
                tx.set_related(seeded.clerk, "supervisor", supervisor)?
            }
            Self::MarkChanged { entity } => tx.mark_changed(pick(&all, *entity))?,
        }
        Ok(None)
    }
}

fn pick(ids: &[EntityId], index: usize) -> EntityId {
    ids[index % ids.len()]
}

/// Strategy for a single mutation.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (any::<usize>(), name_strategy())
            .prop_map(|(customer, name)| Mutation::RenameCustomer { customer, name }),
        (any::<usize>(), -1000i64..1000)
            .prop_map(|(order, number)| Mutation::Renumber { order, number }),
        (any::<usize>(), 0i64..100)
            .prop_map(|(item, quantity)| Mutation::SetQuantity { item, quantity }),
        (any::<usize>(), any::<usize>()).prop_map(|(item, order)| Mutation::MoveItem { item, order }),
        (any::<usize>(), any::<usize>())
            .prop_map(|(order, customer)| Mutation::ReassignOrder { order, customer }),
        any::<usize>().prop_map(|order| Mutation::DetachOrder { order }),
        (any::<usize>(), name_strategy(), 1i64..50).prop_map(|(order, product, quantity)| {
            Mutation::AddItem {
                order,
                product,
                quantity,
            }
        }),
        any::<usize>().prop_map(|item| Mutation::DeleteItem { item }),
        any::<usize>().prop_map(|order| Mutation::MoveTicket { order }),
        any::<bool>().prop_map(|supervised| Mutation::Supervise { supervised }),
        any::<usize>().prop_map(|entity| Mutation::MarkChanged { entity }),
    ]
}

/// Strategy for scripts of up to `max_len` mutations.
pub fn mutation_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation_strategy(), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::seeded;

    proptest! {
        #[test]
        fn generated_values_fit_their_kind(
            value in prop_oneof![
                value_strategy(ValueKind::Bool),
                value_strategy(ValueKind::Int),
                value_strategy(ValueKind::Text),
                value_strategy(ValueKind::Bytes),
            ]
        ) {
            let kind = value.kind().unwrap();
            prop_assert!(value.fits(kind));
        }

        #[test]
        fn scripts_respect_length(script in mutation_script_strategy(6)) {
            prop_assert!(!script.is_empty());
            prop_assert!(script.len() <= 6);
        }
    }

    #[test]
    fn add_item_returns_new_entity() {
        let seeded = seeded();
        let factory = seeded.factory();
        let mut hierarchy = factory.create_root();
        let mut tx = hierarchy.root();
        let mutation = Mutation::AddItem {
            order: 1,
            product: "nut".into(),
            quantity: 4,
        };

        let item = mutation.apply(&mut tx, &seeded).unwrap().unwrap();

        assert_eq!(tx.get_related(item, "order").unwrap(), Some(seeded.second));
        assert_eq!(tx.get_value(item, "quantity").unwrap(), Value::Int(4));
    }
}
