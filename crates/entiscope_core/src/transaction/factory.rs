//! Construction of transaction hierarchies.

use crate::config::Config;
use crate::event::ExtensionFactory;
use crate::mapping::MetadataProvider;
use crate::persistence::PersistenceStrategy;
use crate::transaction::binding::BindingRegistry;
use crate::transaction::hierarchy::TransactionHierarchy;
use crate::transaction::node::TransactionKind;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Creates root and binding transactions over one store and one mapping.
///
/// Extension factories are passed in explicitly and attached to every
/// transaction in the order they were added. All transactions of a factory
/// share one set of entity pins: an entity bound to a binding transaction
/// cannot be loaded by any other transaction until the binding goes away.
pub struct TransactionFactory {
    metadata: Arc<dyn MetadataProvider>,
    store: Arc<dyn PersistenceStrategy>,
    config: Config,
    extensions: Vec<Arc<dyn ExtensionFactory>>,
    bindings: Arc<BindingRegistry>,
    ids: Arc<AtomicU64>,
}

impl TransactionFactory {
    /// Creates a factory with the default configuration and no extensions.
    pub fn new(metadata: Arc<dyn MetadataProvider>, store: Arc<dyn PersistenceStrategy>) -> Self {
        Self {
            metadata,
            store,
            config: Config::default(),
            extensions: Vec::new(),
            bindings: Arc::new(BindingRegistry::new()),
            ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Appends an extension factory.
    #[must_use]
    pub fn with_extension(mut self, extension: Arc<dyn ExtensionFactory>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates a new root transaction.
    pub fn create_root(&self) -> TransactionHierarchy {
        self.create(TransactionKind::Root)
    }

    /// Creates a new binding transaction. Every entity it registers stays
    /// bound to it until it is discarded or dropped.
    pub fn create_binding(&self) -> TransactionHierarchy {
        self.create(TransactionKind::Binding)
    }

    fn create(&self, kind: TransactionKind) -> TransactionHierarchy {
        TransactionHierarchy::new(
            kind,
            Arc::clone(&self.store),
            Arc::clone(&self.metadata),
            self.config.clone(),
            self.extensions.iter().cloned().collect(),
            Arc::clone(&self.ids),
            Arc::clone(&self.bindings),
        )
    }
}

impl fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFactory")
            .field("config", &self.config)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
