//! Event broker, transaction events and extensions.
//!
//! Every state transition of a transaction is announced through its
//! [`EventBroker`]. Handlers are plain closures registered per event kind;
//! extensions are long-lived observers created by an [`ExtensionFactory`].

mod broker;
mod extension;
mod kind;

#[cfg(test)]
pub(crate) use broker::RecordingSink;
pub(crate) use broker::EventSink;
pub use broker::{EventBroker, SubscriptionId};
pub use extension::{ExtensionFactory, TransactionExtension};
pub use kind::{EventKind, TransactionEvent};
