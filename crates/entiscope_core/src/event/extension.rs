//! Transaction extensions.

use crate::error::CoreResult;
use crate::event::TransactionEvent;
use crate::transaction::TransactionKind;
use crate::types::TransactionId;

/// An observer attached to one transaction for its whole lifetime.
///
/// Extensions see every event before ordinary subscribers do. Returning an
/// error from an about-to event cancels the operation.
pub trait TransactionExtension: Send {
    /// Identifies the extension; keys are unique per transaction.
    fn key(&self) -> &str;

    /// Handles one event.
    fn on_event(&mut self, transaction: TransactionId, event: &mut TransactionEvent)
        -> CoreResult<()>;
}

/// Creates the extensions for each new transaction.
///
/// Factories are passed to the [`crate::TransactionFactory`] explicitly and
/// run in the order they were added.
pub trait ExtensionFactory: Send + Sync {
    /// Builds the extensions for a transaction.
    fn create(
        &self,
        transaction: TransactionId,
        kind: TransactionKind,
    ) -> Vec<Box<dyn TransactionExtension>>;
}
