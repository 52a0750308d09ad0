//! Transactions: root, sub and binding scopes over one unit of work.
//!
//! A [`TransactionFactory`] creates [`TransactionHierarchy`] values. Each
//! hierarchy is a stack of transactions where only the innermost one is
//! active; [`Transaction`] handles address one of them.

mod binding;
mod factory;
mod handle;
mod hierarchy;
mod lock;
mod node;

pub(crate) use binding::{BindingGuard, BindingRegistry};
pub(crate) use node::{loader_for, TransactionNode};
pub use factory::TransactionFactory;
pub use handle::Transaction;
pub use hierarchy::TransactionHierarchy;
pub use lock::{TransactionLock, TransactionUnlocker};
pub use node::TransactionKind;
