//! Ordered event fan-out for one transaction.

use crate::entity::{EntityId, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::{EventKind, TransactionEvent, TransactionExtension};
use crate::transaction::{BindingGuard, TransactionLock};
use crate::types::TransactionId;
use std::fmt;
use tracing::trace;

/// Handle returned by [`EventBroker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&mut TransactionEvent) -> CoreResult<()> + Send>;

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: Handler,
}

/// Dispatches the events of one transaction.
///
/// Every event passes the same chain, in this order:
/// 1. the read-only guard, which rejects mutating events while the
///    transaction is inactive
/// 2. hierarchy invalidation, which remembers new records registered in a
///    sub-transaction so every ancestor can mark them invalid
/// 3. binding pins, which tie every record of a binding transaction to it
///    and keep other transactions away from pinned records
/// 4. extensions, in factory order
/// 5. subscribers, in subscription order
///
/// The first error stops the chain and is returned to the operation that
/// raised the event.
pub struct EventBroker {
    transaction: TransactionId,
    is_sub: bool,
    binding: Option<BindingGuard>,
    next_subscription: u64,
    subscribers: Vec<Subscriber>,
    extensions: Vec<Box<dyn TransactionExtension>>,
    pending_invalidations: Vec<EntityId>,
}

impl EventBroker {
    pub(crate) fn new(
        transaction: TransactionId,
        is_sub: bool,
        binding: Option<BindingGuard>,
        extensions: Vec<Box<dyn TransactionExtension>>,
    ) -> Self {
        Self {
            transaction,
            is_sub,
            binding,
            next_subscription: 1,
            subscribers: Vec::new(),
            extensions,
            pending_invalidations: Vec::new(),
        }
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Registers a handler for one event kind, or for every event when
    /// `kind` is `None`.
    pub fn subscribe<F>(&mut self, kind: Option<EventKind>, handler: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionEvent) -> CoreResult<()> + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            kind,
            handler: Box::new(handler),
        });
        id
    }

    /// Removes a handler. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Returns the number of subscribed handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Returns the keys of the attached extensions.
    #[must_use]
    pub fn extension_keys(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.key()).collect()
    }

    /// Sends `event` through the chain.
    pub(crate) fn dispatch(
        &mut self,
        lock: &TransactionLock,
        event: &mut TransactionEvent,
    ) -> CoreResult<()> {
        trace!(transaction = %self.transaction, event = ?event.kind(), "dispatching event");

        if event.is_mutating() && !lock.is_active() {
            return Err(CoreError::read_only(
                self.transaction,
                event.operation_name(),
            ));
        }

        if let TransactionEvent::RecordRegistering { id, state } = event {
            if self.is_sub && *state == RecordState::New {
                self.pending_invalidations.push(*id);
            }
            if let Some(binding) = &self.binding {
                binding.on_register(*id, self.transaction)?;
            }
        }

        for extension in &mut self.extensions {
            extension.on_event(self.transaction, event)?;
        }

        let kind = event.kind();
        for subscriber in &mut self.subscribers {
            if subscriber.kind.map_or(true, |k| k == kind) {
                (subscriber.handler)(event)?;
            }
        }
        Ok(())
    }

    /// Returns and clears the new records ancestors must mark invalid.
    pub(crate) fn take_invalidations(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.pending_invalidations)
    }

    pub(crate) fn sink<'a>(&'a mut self, lock: &'a TransactionLock) -> BrokerSink<'a> {
        BrokerSink { broker: self, lock }
    }
}

impl fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroker")
            .field("transaction", &self.transaction)
            .field("is_sub", &self.is_sub)
            .field("subscribers", &self.subscribers.len())
            .field("extensions", &self.extension_keys())
            .finish()
    }
}

/// Receiver of the events raised by data operations.
pub(crate) trait EventSink {
    fn raise(&mut self, event: &mut TransactionEvent) -> CoreResult<()>;

    fn raise_event(&mut self, mut event: TransactionEvent) -> CoreResult<()> {
        self.raise(&mut event)
    }
}

/// Routes events into a broker, checked against the transaction's lock.
pub(crate) struct BrokerSink<'a> {
    broker: &'a mut EventBroker,
    lock: &'a TransactionLock,
}

impl EventSink for BrokerSink<'_> {
    fn raise(&mut self, event: &mut TransactionEvent) -> CoreResult<()> {
        self.broker.dispatch(self.lock, event)
    }
}

/// Collects raised events for assertions, optionally vetoing one kind.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub(crate) events: Vec<TransactionEvent>,
    veto: Option<EventKind>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn vetoing(kind: EventKind) -> Self {
        Self {
            events: Vec::new(),
            veto: Some(kind),
        }
    }

    pub(crate) fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(TransactionEvent::kind).collect()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn raise(&mut self, event: &mut TransactionEvent) -> CoreResult<()> {
        self.events.push(event.clone());
        if self.veto == Some(event.kind()) {
            return Err(CoreError::vetoed(format!("{:?} vetoed", event.kind())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClassId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn broker(is_sub: bool) -> EventBroker {
        EventBroker::new(TransactionId::new(1), is_sub, None, Vec::new())
    }

    #[test]
    fn inactive_transaction_rejects_mutations() {
        let mut broker = broker(false);
        let lock = TransactionLock::new(false);
        let id = EntityId::new(ClassId::new(1));

        let err = broker
            .dispatch(&lock, &mut TransactionEvent::ObjectDeleting { id })
            .unwrap_err();
        assert!(matches!(err, CoreError::ReadOnly { .. }));
        assert!(broker
            .dispatch(&lock, &mut TransactionEvent::ObjectDeleted { id })
            .is_ok());
    }

    #[test]
    fn subscribers_filter_by_kind() {
        let mut broker = broker(false);
        let lock = TransactionLock::new(true);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        broker.subscribe(Some(EventKind::TransactionDiscarded), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        broker
            .dispatch(&lock, &mut TransactionEvent::TransactionDiscarded)
            .unwrap();
        broker
            .dispatch(&lock, &mut TransactionEvent::SubTransactionCreating)
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_error_vetoes() {
        let mut broker = broker(false);
        let lock = TransactionLock::new(true);
        let id = broker.subscribe(None, |_| Err(CoreError::vetoed("no")));
        assert!(broker
            .dispatch(&lock, &mut TransactionEvent::SubTransactionCreating)
            .is_err());

        assert!(broker.unsubscribe(id));
        assert!(!broker.unsubscribe(id));
        assert!(broker
            .dispatch(&lock, &mut TransactionEvent::SubTransactionCreating)
            .is_ok());
    }

    #[test]
    fn committing_handlers_can_add_objects() {
        let mut broker = broker(false);
        let lock = TransactionLock::new(true);
        let extra = EntityId::new(ClassId::new(1));
        broker.subscribe(Some(EventKind::Committing), move |event| {
            if let TransactionEvent::Committing { additional, .. } = event {
                additional.push(extra);
            }
            Ok(())
        });

        let mut event = TransactionEvent::Committing {
            ids: vec![],
            additional: vec![],
        };
        broker.dispatch(&lock, &mut event).unwrap();
        assert!(matches!(
            &event,
            TransactionEvent::Committing { additional, .. } if *additional == vec![extra]
        ));
    }

    #[test]
    fn sub_collects_new_records_for_ancestors() {
        let lock = TransactionLock::new(true);
        let id = EntityId::new(ClassId::new(1));
        let mut registering = TransactionEvent::RecordRegistering {
            id,
            state: RecordState::New,
        };

        let mut root = broker(false);
        root.dispatch(&lock, &mut registering).unwrap();
        assert!(root.take_invalidations().is_empty());

        let mut sub = broker(true);
        sub.dispatch(&lock, &mut registering).unwrap();
        assert_eq!(sub.take_invalidations(), vec![id]);
        assert!(sub.take_invalidations().is_empty());
    }
}
