//! Commit and rollback.

mod agent;
mod validation;

pub(crate) use agent::CommitRollbackAgent;
