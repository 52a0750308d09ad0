//! A root transaction and its stack of nested sub-transactions.

use crate::commit::CommitRollbackAgent;
use crate::config::Config;
use crate::data::{DataManager, OperationContext};
use crate::entity::{EntityId, RecordState};
use crate::error::{CoreError, CoreResult};
use crate::event::{EventBroker, ExtensionFactory, TransactionEvent, TransactionExtension};
use crate::mapping::MetadataProvider;
use crate::persistence::PersistenceStrategy;
use crate::transaction::binding::{BindingGuard, BindingRegistry};
use crate::transaction::handle::Transaction;
use crate::transaction::node::{loader_for, TransactionKind, TransactionNode};
use crate::types::TransactionId;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A root transaction and the sub-transactions nested below it.
///
/// The hierarchy is a stack: only the innermost transaction is active, and
/// every ancestor stays read-only until the sub-transaction below it is
/// committed or discarded. Operations address a transaction by its ID
/// through a [`Transaction`] handle.
///
/// ## Invalid objects
///
/// A record created in a sub-transaction does not exist for the ancestors
/// until the sub-transaction commits. Every ancestor marks such objects
/// invalid as soon as they are registered.
pub struct TransactionHierarchy {
    /// Transactions, root first.
    nodes: Vec<TransactionNode>,
    /// ID of the root transaction.
    root: TransactionId,
    /// Persistence collaborator of the root.
    store: Arc<dyn PersistenceStrategy>,
    /// Mapping metadata shared by all transactions.
    metadata: Arc<dyn MetadataProvider>,
    /// Settings shared by all transactions.
    config: Config,
    /// Extension factories, in the order they run.
    extensions: Arc<[Arc<dyn ExtensionFactory>]>,
    /// Transaction ID allocator shared with the factory.
    ids: Arc<AtomicU64>,
    /// Entity pins shared by every hierarchy of the factory.
    bindings: Arc<BindingRegistry>,
}

impl TransactionHierarchy {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        kind: TransactionKind,
        store: Arc<dyn PersistenceStrategy>,
        metadata: Arc<dyn MetadataProvider>,
        config: Config,
        extensions: Arc<[Arc<dyn ExtensionFactory>]>,
        ids: Arc<AtomicU64>,
        bindings: Arc<BindingRegistry>,
    ) -> Self {
        let root = TransactionId::new(ids.fetch_add(1, Ordering::SeqCst));
        let mut hierarchy = Self {
            nodes: Vec::new(),
            root,
            store,
            metadata,
            config,
            extensions,
            ids,
            bindings,
        };
        let node = hierarchy.build_node(root, kind, HashSet::new());
        hierarchy.nodes.push(node);
        debug!(transaction = %root, kind = ?kind, "created root transaction");
        hierarchy
    }

    fn build_node(
        &self,
        id: TransactionId,
        kind: TransactionKind,
        invalid: HashSet<EntityId>,
    ) -> TransactionNode {
        let extensions: Vec<Box<dyn TransactionExtension>> = self
            .extensions
            .iter()
            .flat_map(|factory| factory.create(id, kind))
            .collect();
        let binding = match kind {
            TransactionKind::Binding => BindingGuard::pinning(Arc::clone(&self.bindings)),
            TransactionKind::Root | TransactionKind::Sub => {
                BindingGuard::checking(Arc::clone(&self.bindings))
            }
        };
        let data = DataManager::new(id, Arc::clone(&self.metadata), self.config.clone(), invalid);
        let broker = EventBroker::new(id, kind == TransactionKind::Sub, Some(binding), extensions);
        TransactionNode::new(kind, data, broker)
    }

    /// Returns a handle to the root transaction.
    pub fn root(&mut self) -> Transaction<'_> {
        let id = self.root;
        Transaction::new(self, id)
    }

    /// Returns a handle to transaction `id`.
    pub fn transaction(&mut self, id: TransactionId) -> CoreResult<Transaction<'_>> {
        self.index_of(id)?;
        Ok(Transaction::new(self, id))
    }

    /// Returns a handle to the innermost, active transaction.
    pub fn innermost(&mut self) -> CoreResult<Transaction<'_>> {
        let id = self
            .nodes
            .last()
            .map(|node| node.id)
            .ok_or(CoreError::TransactionDiscarded {
                transaction: self.root,
            })?;
        Ok(Transaction::new(self, id))
    }

    /// Returns the ID of the root transaction.
    #[must_use]
    pub fn root_id(&self) -> TransactionId {
        self.root
    }

    /// Returns the number of live transactions, root included.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if transaction `id` has not been discarded.
    #[must_use]
    pub fn contains(&self, id: TransactionId) -> bool {
        self.nodes.iter().any(|node| node.id == id)
    }

    /// Returns the kind of transaction `id`.
    pub fn kind(&self, id: TransactionId) -> CoreResult<TransactionKind> {
        Ok(self.node(id)?.kind)
    }

    /// Returns true if transaction `id` accepts mutations.
    pub fn is_active(&self, id: TransactionId) -> CoreResult<bool> {
        Ok(self.node(id)?.lock.is_active())
    }

    /// Returns the data of transaction `id`.
    pub fn data(&self, id: TransactionId) -> CoreResult<&DataManager> {
        Ok(&self.node(id)?.data)
    }

    /// Returns the event broker of transaction `id`.
    pub fn events(&mut self, id: TransactionId) -> CoreResult<&mut EventBroker> {
        let index = self.index_of(id)?;
        Ok(&mut self.nodes[index].broker)
    }

    fn index_of(&self, id: TransactionId) -> CoreResult<usize> {
        self.nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or(CoreError::TransactionDiscarded { transaction: id })
    }

    fn node(&self, id: TransactionId) -> CoreResult<&TransactionNode> {
        let index = self.index_of(id)?;
        Ok(&self.nodes[index])
    }

    /// Runs a data operation in transaction `id`.
    ///
    /// The transaction reads missing records through its ancestors, down to
    /// the store. New objects registered by a sub-transaction are marked
    /// invalid in every ancestor afterwards, whether `f` succeeded or not.
    pub(crate) fn run<T>(
        &mut self,
        id: TransactionId,
        f: impl FnOnce(&mut DataManager, &mut OperationContext<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let index = self.index_of(id)?;
        let result = {
            let (ancestors, rest) = self.nodes.split_at_mut(index);
            match rest.first_mut() {
                Some(node) => {
                    let mut loader = loader_for(ancestors, self.store.as_ref());
                    node.operate(loader.as_mut(), f)
                }
                None => Err(CoreError::TransactionDiscarded { transaction: id }),
            }
        };
        self.propagate_invalidations();
        result
    }

    fn propagate_invalidations(&mut self) {
        for index in 1..self.nodes.len() {
            let ids = self.nodes[index].broker.take_invalidations();
            for id in ids {
                for ancestor in &mut self.nodes[..index] {
                    ancestor.data.mark_invalid(id);
                }
            }
        }
    }

    /// Creates a sub-transaction below `parent`, which becomes read-only.
    pub(crate) fn create_sub(&mut self, parent: TransactionId) -> CoreResult<TransactionId> {
        let index = self.index_of(parent)?;
        if index + 1 != self.nodes.len() {
            return Err(CoreError::structural(format!(
                "transaction {parent} already has an active sub-transaction"
            )));
        }
        let node = &mut self.nodes[index];
        if node.kind == TransactionKind::Binding {
            return Err(CoreError::structural(format!(
                "binding transaction {parent} cannot create sub-transactions"
            )));
        }

        node.raise(TransactionEvent::SubTransactionCreating)?;
        node.lock.set_active(false);

        let mut invalid = node.data.invalid.clone();
        invalid.extend(
            node.data
                .records()
                .ids_where(|r| r.state() == RecordState::Deleted),
        );
        let id = TransactionId::new(self.ids.fetch_add(1, Ordering::SeqCst));
        let sub = self.build_node(id, TransactionKind::Sub, invalid);
        self.nodes.push(sub);
        debug!(transaction = %id, parent = %parent, "created sub-transaction");

        if let Err(error) = self.nodes[index].raise(TransactionEvent::SubTransactionCreated { sub: id }) {
            self.nodes.truncate(index + 1);
            self.nodes[index].lock.set_active(true);
            return Err(error);
        }
        Ok(id)
    }

    /// Discards transaction `id` and every transaction nested below it.
    ///
    /// Sub-transactions are discarded innermost first; the parent becomes
    /// active again. Discarding the root leaves an empty hierarchy.
    pub(crate) fn discard(&mut self, id: TransactionId) -> CoreResult<()> {
        let index = self.index_of(id)?;
        for mut node in self.nodes.drain(index..).rev() {
            if let Err(error) = node.raise(TransactionEvent::TransactionDiscarded) {
                warn!(transaction = %node.id, %error, "discard listener failed");
            }
            if node.kind == TransactionKind::Binding {
                self.bindings.release(node.id);
            }
            debug!(transaction = %node.id, "discarded transaction");
        }
        if let Some(parent) = self.nodes.last() {
            parent.lock.set_active(true);
        }
        Ok(())
    }

    /// Commits transaction `id`. A committed sub-transaction is discarded
    /// after its changes were merged into the parent.
    pub(crate) fn commit(&mut self, id: TransactionId) -> CoreResult<()> {
        let index = self.index_of(id)?;
        let result = {
            let agent = CommitRollbackAgent::new(self.store.as_ref());
            let (ancestors, rest) = self.nodes.split_at_mut(index);
            match rest.first_mut() {
                Some(node) => agent.commit(ancestors, node),
                None => Err(CoreError::TransactionDiscarded { transaction: id }),
            }
        };
        self.propagate_invalidations();
        result?;
        if index > 0 {
            self.discard(id)?;
        }
        Ok(())
    }

    /// Rolls back the changes of transaction `id`.
    pub(crate) fn rollback(&mut self, id: TransactionId) -> CoreResult<()> {
        let index = self.index_of(id)?;
        CommitRollbackAgent::rollback(&mut self.nodes[index])
    }
}

impl Drop for TransactionHierarchy {
    fn drop(&mut self) {
        for node in &self.nodes {
            if node.kind == TransactionKind::Binding {
                self.bindings.release(node.id);
            }
        }
    }
}

impl fmt::Debug for TransactionHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHierarchy")
            .field("root", &self.root)
            .field("nodes", &self.nodes)
            .field("config", &self.config)
            .finish()
    }
}
