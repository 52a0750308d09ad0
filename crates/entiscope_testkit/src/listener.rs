//! Recording event listeners.
//!
//! An [`EventLog`] collects every event it sees, tagged with the raising
//! transaction. It can be attached to a single transaction as a subscriber
//! or to every transaction of a factory as an extension.

use entiscope_core::{
    CoreResult, EventKind, ExtensionFactory, SubscriptionId, Transaction, TransactionEvent,
    TransactionExtension, TransactionId, TransactionKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Transaction that raised the event.
    pub transaction: TransactionId,
    /// The event as the handler saw it.
    pub event: TransactionEvent,
}

/// Shared, cloneable event recorder.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the log to every event of `tx`.
    pub fn attach(&self, tx: &mut Transaction<'_>) -> CoreResult<SubscriptionId> {
        let transaction = tx.id();
        let log = self.clone();
        Ok(tx.events()?.subscribe(None, move |event| {
            log.record(transaction, event);
            Ok(())
        }))
    }

    /// Returns an extension factory recording the events of every
    /// transaction it is attached to.
    pub fn extension(&self) -> Arc<dyn ExtensionFactory> {
        Arc::new(RecordingFactory { log: self.clone() })
    }

    /// Returns all recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the kinds of all recorded events, in order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|r| r.event.kind()).collect()
    }

    /// Returns the kinds raised by `transaction`, in order.
    pub fn kinds_of(&self, transaction: TransactionId) -> Vec<EventKind> {
        self.events
            .lock()
            .iter()
            .filter(|r| r.transaction == transaction)
            .map(|r| r.event.kind())
            .collect()
    }

    /// Counts the recorded events of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|r| r.event.kind() == kind)
            .count()
    }

    /// Counts events announcing or reporting a change of data.
    pub fn change_notifications(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|r| r.event.is_mutating() || is_change_report(r.event.kind()))
            .count()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, transaction: TransactionId, event: &TransactionEvent) {
        trace!(transaction = %transaction, kind = ?event.kind(), "recorded event");
        self.events.lock().push(RecordedEvent {
            transaction,
            event: event.clone(),
        });
    }
}

fn is_change_report(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::PropertyValueChanged
            | EventKind::RelationChanged
            | EventKind::VirtualRelationStateUpdated
            | EventKind::ObjectDeleted
            | EventKind::RolledBack
            | EventKind::Committed
    )
}

struct RecordingFactory {
    log: EventLog,
}

impl ExtensionFactory for RecordingFactory {
    fn create(
        &self,
        transaction: TransactionId,
        _kind: TransactionKind,
    ) -> Vec<Box<dyn TransactionExtension>> {
        vec![Box::new(RecordingExtension {
            key: format!("recording-{transaction}"),
            log: self.log.clone(),
        })]
    }
}

struct RecordingExtension {
    key: String,
    log: EventLog,
}

impl TransactionExtension for RecordingExtension {
    fn key(&self) -> &str {
        &self.key
    }

    fn on_event(
        &mut self,
        transaction: TransactionId,
        event: &mut TransactionEvent,
    ) -> CoreResult<()> {
        self.log.record(transaction, event);
        Ok(())
    }
}
