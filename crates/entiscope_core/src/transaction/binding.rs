//! Entity pins of binding transactions.

use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Records which binding transaction each entity is bound to.
///
/// Shared by all binding transactions of one factory. An entity enlisted in
/// a binding transaction stays bound to it until that transaction is
/// discarded.
#[derive(Debug, Default)]
pub(crate) struct BindingRegistry {
    pins: Mutex<HashMap<EntityId, TransactionId>>,
}

impl BindingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `transaction`. Fails if another transaction holds it.
    pub(crate) fn enlist(&self, id: EntityId, transaction: TransactionId) -> CoreResult<()> {
        let mut pins = self.pins.lock();
        match pins.get(&id) {
            Some(owner) if *owner != transaction => Err(CoreError::structural(format!(
                "{id} is bound to transaction {owner} and cannot be enlisted in {transaction}"
            ))),
            Some(_) => Ok(()),
            None => {
                pins.insert(id, transaction);
                Ok(())
            }
        }
    }

    /// Releases every entity bound to `transaction`.
    pub(crate) fn release(&self, transaction: TransactionId) {
        self.pins.lock().retain(|_, owner| *owner != transaction);
    }

    pub(crate) fn binding_of(&self, id: EntityId) -> Option<TransactionId> {
        self.pins.lock().get(&id).copied()
    }

    /// Fails if `id` is bound to a binding transaction other than `transaction`.
    pub(crate) fn ensure_unbound(&self, id: EntityId, transaction: TransactionId) -> CoreResult<()> {
        match self.binding_of(id) {
            Some(owner) if owner != transaction => Err(CoreError::structural(format!(
                "{id} is bound to transaction {owner} and cannot be enlisted in {transaction}"
            ))),
            _ => Ok(()),
        }
    }
}

/// The part a transaction plays in entity pinning.
///
/// A binding transaction pins every record it registers. Any other
/// transaction of the same factory only checks that the record is not
/// pinned elsewhere.
#[derive(Debug, Clone)]
pub(crate) struct BindingGuard {
    registry: Arc<BindingRegistry>,
    pins: bool,
}

impl BindingGuard {
    pub(crate) fn pinning(registry: Arc<BindingRegistry>) -> Self {
        Self { registry, pins: true }
    }

    pub(crate) fn checking(registry: Arc<BindingRegistry>) -> Self {
        Self {
            registry,
            pins: false,
        }
    }

    /// Runs when `transaction` registers the record of `id`.
    pub(crate) fn on_register(&self, id: EntityId, transaction: TransactionId) -> CoreResult<()> {
        if self.pins {
            self.registry.enlist(id, transaction)
        } else {
            self.registry.ensure_unbound(id, transaction)
        }
    }
}
