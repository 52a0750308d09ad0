//! Entity identifier.

use crate::types::ClassId;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an entity.
///
/// An entity ID pairs the class of the entity with a 128-bit identity value:
/// - Equality is structural
/// - Immutable once assigned
/// - Used as a map key by records and relation endpoints alike
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    class: ClassId,
    value: [u8; 16],
}

impl EntityId {
    /// Creates a new random entity ID for `class`.
    #[must_use]
    pub fn new(class: ClassId) -> Self {
        Self::from_uuid(class, Uuid::new_v4())
    }

    /// Creates an entity ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(class: ClassId, value: [u8; 16]) -> Self {
        Self { class, value }
    }

    /// Creates an entity ID from a UUID.
    #[must_use]
    pub fn from_uuid(class: ClassId, uuid: Uuid) -> Self {
        Self::from_bytes(class, uuid.into_bytes())
    }

    /// Returns the class of the entity.
    #[inline]
    #[must_use]
    pub const fn class(&self) -> ClassId {
        self.class
    }

    /// Returns the raw identity bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.value
    }

    /// Converts the identity value to a UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.value)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}|{})", self.class, self.to_uuid())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.class, self.to_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        let class = ClassId::new(1);
        assert_ne!(EntityId::new(class), EntityId::new(class));
    }

    #[test]
    fn equality_is_structural() {
        let a = EntityId::from_bytes(ClassId::new(1), [7; 16]);
        let b = EntityId::from_bytes(ClassId::new(1), [7; 16]);
        let c = EntityId::from_bytes(ClassId::new(2), [7; 16]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn uuid_conversion() {
        let uuid = Uuid::new_v4();
        let id = EntityId::from_uuid(ClassId::new(3), uuid);
        assert_eq!(id.to_uuid(), uuid);
        assert_eq!(id.class(), ClassId::new(3));
    }

    #[test]
    fn display_includes_class() {
        let id = EntityId::from_bytes(ClassId::new(4), [0; 16]);
        assert!(format!("{id}").starts_with("cls:4|"));
    }
}
