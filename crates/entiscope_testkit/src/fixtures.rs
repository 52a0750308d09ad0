//! Order-management mapping and seeded stores.
//!
//! The model:
//!
//! | Class         | Properties                                  |
//! |---------------|---------------------------------------------|
//! | `Customer`    | `name`, virtual `orders`                    |
//! | `Order`       | `number`, `customer`, virtual `items` (mandatory), virtual `ticket` |
//! | `OrderItem`   | `product`, `quantity`, `order` (mandatory)  |
//! | `OrderTicket` | `code`, `order` (one-to-one)                |
//! | `Employee`    | `name`, `supervisor` (unidirectional)       |

use entiscope_core::{
    Cardinality, ClassId, Config, CoreResult, EndpointDefId, EntityId, InMemoryStore,
    MappingBuilder, MappingConfiguration, MetadataProvider, RelationEndpointId,
    RelationOptions, Transaction, TransactionFactory, Value, ValueKind,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Class and endpoint IDs of the order-management mapping.
#[derive(Debug, Clone)]
pub struct OrderModel {
    /// The mapping.
    pub mapping: Arc<MappingConfiguration>,
    /// `Customer` class.
    pub customer: ClassId,
    /// `Order` class.
    pub order: ClassId,
    /// `OrderItem` class.
    pub order_item: ClassId,
    /// `OrderTicket` class.
    pub order_ticket: ClassId,
    /// `Employee` class.
    pub employee: ClassId,
    /// `Order.customer` (real).
    pub order_customer: EndpointDefId,
    /// `Customer.orders` (virtual collection).
    pub customer_orders: EndpointDefId,
    /// `OrderItem.order` (real, mandatory).
    pub item_order: EndpointDefId,
    /// `Order.items` (virtual collection, mandatory).
    pub order_items: EndpointDefId,
    /// `OrderTicket.order` (real).
    pub ticket_order: EndpointDefId,
    /// `Order.ticket` (virtual single).
    pub order_ticket_end: EndpointDefId,
    /// `Employee.supervisor` (real, unidirectional).
    pub employee_supervisor: EndpointDefId,
}

impl OrderModel {
    /// Builds the mapping.
    pub fn new() -> Self {
        let mut builder = MappingBuilder::new();
        let customer = builder.add_class("Customer").expect("Customer");
        let order = builder.add_class("Order").expect("Order");
        let order_item = builder.add_class("OrderItem").expect("OrderItem");
        let order_ticket = builder.add_class("OrderTicket").expect("OrderTicket");
        let employee = builder.add_class("Employee").expect("Employee");

        builder
            .add_property(customer, "name", ValueKind::Text, false)
            .expect("Customer.name");
        builder
            .add_property(order, "number", ValueKind::Int, false)
            .expect("Order.number");
        builder
            .add_property(order_item, "product", ValueKind::Text, false)
            .expect("OrderItem.product");
        builder
            .add_property(order_item, "quantity", ValueKind::Int, false)
            .expect("OrderItem.quantity");
        builder
            .add_property(order_ticket, "code", ValueKind::Text, false)
            .expect("OrderTicket.code");
        builder
            .add_property(employee, "name", ValueKind::Text, false)
            .expect("Employee.name");

        let customer_orders = builder
            .add_one_to_many(order, "customer", customer, "orders", RelationOptions::new())
            .expect("Order.customer");
        let order_items = builder
            .add_one_to_many(
                order_item,
                "order",
                order,
                "items",
                RelationOptions::new().real_mandatory().virtual_mandatory(),
            )
            .expect("OrderItem.order");
        let ticket = builder
            .add_one_to_one(order_ticket, "order", order, "ticket", RelationOptions::new())
            .expect("OrderTicket.order");
        let supervisor = builder
            .add_unidirectional(employee, "supervisor", employee, RelationOptions::new())
            .expect("Employee.supervisor");

        Self {
            mapping: Arc::new(builder.build()),
            customer,
            order,
            order_item,
            order_ticket,
            employee,
            order_customer: customer_orders.real,
            customer_orders: customer_orders.virtual_end.expect("virtual end"),
            item_order: order_items.real,
            order_items: order_items.virtual_end.expect("virtual end"),
            ticket_order: ticket.real,
            order_ticket_end: ticket.virtual_end.expect("virtual end"),
            employee_supervisor: supervisor.real,
        }
    }

    /// Creates an empty store for this mapping.
    pub fn empty_store(&self) -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new(self.mapping.clone()))
    }
}

impl Default for OrderModel {
    fn default() -> Self {
        Self::new()
    }
}

/// A store seeded with a small order book.
///
/// - Ada has orders #1 (widget x2, gadget x1, ticket T-1) and #2 (bolt x10).
/// - Bob has no orders.
/// - The clerk reports to the boss.
#[derive(Debug, Clone)]
pub struct Seeded {
    /// The mapping.
    pub model: OrderModel,
    /// The seeded store.
    pub store: Arc<InMemoryStore>,
    /// Customer "Ada".
    pub ada: EntityId,
    /// Customer "Bob".
    pub bob: EntityId,
    /// Order #1 of Ada.
    pub first: EntityId,
    /// Order #2 of Ada.
    pub second: EntityId,
    /// Item of order #1.
    pub widget: EntityId,
    /// Item of order #1.
    pub gadget: EntityId,
    /// Only item of order #2.
    pub bolt: EntityId,
    /// Ticket of order #1.
    pub ticket: EntityId,
    /// Employee without supervisor.
    pub boss: EntityId,
    /// Employee supervised by the boss.
    pub clerk: EntityId,
}

/// Creates the seeded order book.
pub fn seeded() -> Seeded {
    let model = OrderModel::new();
    let store = model.empty_store();

    let ada = seed(&store, model.customer, vec![Value::text("Ada")]);
    let bob = seed(&store, model.customer, vec![Value::text("Bob")]);
    let first = seed(&store, model.order, vec![Value::Int(1), Value::Reference(ada)]);
    let second = seed(&store, model.order, vec![Value::Int(2), Value::Reference(ada)]);
    let widget = seed(
        &store,
        model.order_item,
        vec![Value::text("widget"), Value::Int(2), Value::Reference(first)],
    );
    let gadget = seed(
        &store,
        model.order_item,
        vec![Value::text("gadget"), Value::Int(1), Value::Reference(first)],
    );
    let bolt = seed(
        &store,
        model.order_item,
        vec![Value::text("bolt"), Value::Int(10), Value::Reference(second)],
    );
    let ticket = seed(
        &store,
        model.order_ticket,
        vec![Value::text("T-1"), Value::Reference(first)],
    );
    let boss = seed(&store, model.employee, vec![Value::text("Grace"), Value::Null]);
    let clerk = seed(
        &store,
        model.employee,
        vec![Value::text("Linus"), Value::Reference(boss)],
    );

    debug!(rows = store.len(), "seeded order book");
    Seeded {
        model,
        store,
        ada,
        bob,
        first,
        second,
        widget,
        gadget,
        bolt,
        ticket,
        boss,
        clerk,
    }
}

fn seed(store: &InMemoryStore, class: ClassId, values: Vec<Value>) -> EntityId {
    let id = EntityId::new(class);
    store.insert(id, values).expect("seed row");
    id
}

impl Seeded {
    /// Creates a transaction factory over the seeded store.
    pub fn factory(&self) -> TransactionFactory {
        TransactionFactory::new(self.model.mapping.clone(), self.store.clone())
    }

    /// Creates a transaction factory with a custom configuration.
    pub fn factory_with(&self, config: Config) -> TransactionFactory {
        self.factory().with_config(config)
    }

    /// Every seeded entity.
    pub fn all(&self) -> Vec<EntityId> {
        vec![
            self.ada,
            self.bob,
            self.first,
            self.second,
            self.widget,
            self.gadget,
            self.bolt,
            self.ticket,
            self.boss,
            self.clerk,
        ]
    }

    /// The `items` endpoint of an order.
    pub fn items_of(&self, order: EntityId) -> RelationEndpointId {
        RelationEndpointId::new(order, self.model.order_items)
    }

    /// The `orders` endpoint of a customer.
    pub fn orders_of(&self, customer: EntityId) -> RelationEndpointId {
        RelationEndpointId::new(customer, self.model.customer_orders)
    }

    /// The `order` endpoint of an item.
    pub fn order_of_item(&self, item: EntityId) -> RelationEndpointId {
        RelationEndpointId::new(item, self.model.item_order)
    }

    /// Returns the stored value of `property`, bypassing every transaction.
    pub fn stored(&self, id: EntityId, property: &str) -> Option<Value> {
        let slot = self.model.mapping.class(id.class())?.property_slot(property)?;
        self.store.row(id).map(|row| row.values[slot].clone())
    }
}

/// What a transaction reports for one property of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// A scalar value.
    Value(Value),
    /// A single-valued relation.
    Object(Option<EntityId>),
    /// A collection relation, sorted.
    Collection(Vec<EntityId>),
}

/// Every property of a set of entities as one transaction sees them.
pub type Snapshot = BTreeMap<(EntityId, String), Observed>;

/// Reads every scalar and relation property of `ids` through `tx`.
///
/// Collections are sorted so snapshots compare independently of load order.
pub fn snapshot(
    tx: &mut Transaction<'_>,
    mapping: &MappingConfiguration,
    ids: &[EntityId],
) -> CoreResult<Snapshot> {
    let mut snapshot = Snapshot::new();
    for &id in ids {
        let class = mapping.require_class(id.class())?;
        for property in class.properties() {
            let name = property.name().to_string();
            let observed = match property.relation() {
                None => Observed::Value(tx.get_value(id, &name)?),
                Some(_) => Observed::Object(tx.get_related(id, &name)?),
            };
            snapshot.insert((id, name), observed);
        }
        for def_id in class.endpoints() {
            let definition = mapping.require_endpoint(*def_id)?;
            if !definition.is_virtual() {
                continue;
            }
            let name = definition.property().to_string();
            let observed = match definition.cardinality() {
                Cardinality::One => Observed::Object(tx.get_related(id, &name)?),
                Cardinality::Many => {
                    let mut items = tx.get_related_collection(id, &name)?;
                    items.sort();
                    Observed::Collection(items)
                }
            };
            snapshot.insert((id, name), observed);
        }
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_declares_relations() {
        let model = OrderModel::new();
        let items = model.mapping.require_endpoint(model.order_items).unwrap();
        assert_eq!(items.cardinality(), Cardinality::Many);
        assert!(items.is_virtual());
        assert!(items.is_mandatory());

        let ticket = model.mapping.require_endpoint(model.order_ticket_end).unwrap();
        assert_eq!(ticket.cardinality(), Cardinality::One);

        let supervisor = model.mapping.require_endpoint(model.employee_supervisor).unwrap();
        assert_eq!(supervisor.opposite(), None);
    }

    #[test]
    fn seeded_store_holds_every_row() {
        let seeded = seeded();
        assert_eq!(seeded.store.len(), seeded.all().len());
        assert_eq!(seeded.stored(seeded.bolt, "quantity"), Some(Value::Int(10)));
        assert_eq!(seeded.stored(seeded.clerk, "supervisor"), Some(Value::Reference(seeded.boss)));
    }

    #[test]
    fn snapshot_reads_both_sides_of_relations() {
        let seeded = seeded();
        let factory = seeded.factory();
        let mut hierarchy = factory.create_root();
        let mut tx = hierarchy.root();

        let snap = snapshot(&mut tx, &seeded.model.mapping, &[seeded.first, seeded.ticket]).unwrap();

        let mut items = vec![seeded.widget, seeded.gadget];
        items.sort();
        assert_eq!(snap[&(seeded.first, "items".to_string())], Observed::Collection(items));
        assert_eq!(snap[&(seeded.first, "ticket".to_string())], Observed::Object(Some(seeded.ticket)));
        assert_eq!(snap[&(seeded.ticket, "order".to_string())], Observed::Object(Some(seeded.first)));
        assert_eq!(snap[&(seeded.first, "number".to_string())], Observed::Value(Value::Int(1)));
        assert!(!tx.has_changes().unwrap());
    }
}
