//! Error types for entiscope core.

use crate::entity::EntityId;
use crate::types::{ClassId, TransactionId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entiscope core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The requested entity has no backing record.
    #[error("entity not found: {id}")]
    NotFound {
        /// The entity that was not found.
        id: EntityId,
    },

    /// The entity is permanently invalid in this transaction.
    ///
    /// Raised for new objects that were rolled back or discarded, objects
    /// whose deletion was committed, and objects created in a sub-transaction
    /// that the ancestor has not seen yet.
    #[error("entity is invalid in this transaction: {id}")]
    ObjectInvalid {
        /// The invalid entity.
        id: EntityId,
    },

    /// The entity has been deleted in this transaction.
    #[error("entity has been deleted: {id}")]
    ObjectDeleted {
        /// The deleted entity.
        id: EntityId,
    },

    /// Mutation attempted on an inactive (read-only) transaction.
    #[error("transaction {transaction} is read-only: cannot {operation}")]
    ReadOnly {
        /// The inactive transaction.
        transaction: TransactionId,
        /// The rejected operation.
        operation: String,
    },

    /// The record was modified by someone else since it was loaded.
    #[error("concurrency violation: {id} was modified since it was loaded")]
    ConcurrencyViolation {
        /// The conflicting entity.
        id: EntityId,
    },

    /// A mandatory relation is empty or null at commit time.
    #[error("mandatory relation '{property}' of {id} is not set")]
    MandatoryRelation {
        /// The entity owning the relation.
        id: EntityId,
        /// Relation property name.
        property: String,
    },

    /// A non-nullable property is null at commit time.
    #[error("mandatory property '{property}' of {id} is null")]
    MandatoryProperty {
        /// The entity owning the property.
        id: EntityId,
        /// Property name.
        property: String,
    },

    /// The engine was used in a way that is never valid.
    #[error("structural misuse: {message}")]
    StructuralMisuse {
        /// Description of the misuse.
        message: String,
    },

    /// The relation cannot be changed because its two sides disagree.
    #[error("relation '{property}' of {id} is out of sync with its opposite end")]
    RelationOutOfSync {
        /// Entity owning the endpoint.
        id: EntityId,
        /// Relation property name.
        property: String,
    },

    /// The transaction handle refers to a discarded transaction.
    #[error("transaction {transaction} has been discarded")]
    TransactionDiscarded {
        /// The discarded transaction.
        transaction: TransactionId,
    },

    /// A listener cancelled the operation.
    #[error("operation cancelled by listener: {reason}")]
    Vetoed {
        /// Reason given by the listener.
        reason: String,
    },

    /// The class has no property with this name.
    #[error("class {class} has no property '{property}'")]
    UnknownProperty {
        /// The class searched.
        class: ClassId,
        /// The missing property name.
        property: String,
    },

    /// The persistence collaborator failed.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the failure.
        message: String,
    },

    /// Mapping metadata is inconsistent.
    #[error("invalid mapping: {message}")]
    Mapping {
        /// Description of the issue.
        message: String,
    },
}

impl CoreError {
    /// Creates a structural misuse error.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralMisuse {
            message: message.into(),
        }
    }

    /// Creates a read-only violation error.
    pub fn read_only(transaction: TransactionId, operation: impl Into<String>) -> Self {
        Self::ReadOnly {
            transaction,
            operation: operation.into(),
        }
    }

    /// Creates a listener veto error.
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self::Vetoed {
            reason: reason.into(),
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
        }
    }

    /// Creates a mandatory relation error.
    pub fn mandatory_relation(id: EntityId, property: impl Into<String>) -> Self {
        Self::MandatoryRelation {
            id,
            property: property.into(),
        }
    }

    /// Creates an out-of-sync relation error.
    pub fn out_of_sync(id: EntityId, property: impl Into<String>) -> Self {
        Self::RelationOutOfSync {
            id,
            property: property.into(),
        }
    }

    /// Returns the entity named by this error, if any.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::NotFound { id }
            | Self::ObjectInvalid { id }
            | Self::ObjectDeleted { id }
            | Self::ConcurrencyViolation { id }
            | Self::MandatoryRelation { id, .. }
            | Self::MandatoryProperty { id, .. }
            | Self::RelationOutOfSync { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns true for errors raised during commit validation.
    #[must_use]
    pub fn is_commit_validation(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyViolation { .. }
                | Self::MandatoryRelation { .. }
                | Self::MandatoryProperty { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_names_entity() {
        let id = EntityId::new(ClassId::new(1));
        let err = CoreError::mandatory_relation(id, "orders");
        assert_eq!(err.entity(), Some(id));
        assert!(err.is_commit_validation());
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn read_only_message() {
        let err = CoreError::read_only(TransactionId::new(3), "set property");
        assert_eq!(
            err.to_string(),
            "transaction txn:3 is read-only: cannot set property"
        );
        assert_eq!(err.entity(), None);
    }
}
