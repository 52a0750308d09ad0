//! Active/read-only state of a transaction.

use std::sync::atomic::{AtomicBool, Ordering};

/// The active flag of one transaction.
///
/// Only the innermost transaction of a hierarchy is active. Its ancestors
/// are read-only and reject every mutating event until the sub-transaction
/// below them is discarded.
#[derive(Debug)]
pub struct TransactionLock {
    active: AtomicBool,
}

impl TransactionLock {
    pub(crate) fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    /// Returns true if the transaction accepts mutations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Makes the transaction active until the returned guard is dropped.
    pub(crate) fn unlock(&self) -> TransactionUnlocker<'_> {
        let previous = self.active.swap(true, Ordering::SeqCst);
        TransactionUnlocker {
            lock: self,
            previous,
        }
    }
}

/// Scoped write permission on a read-only transaction.
///
/// The previous state is restored when the guard is dropped, on every exit
/// path including errors.
#[derive(Debug)]
#[must_use = "the transaction is locked again as soon as the unlocker is dropped"]
pub struct TransactionUnlocker<'a> {
    lock: &'a TransactionLock,
    previous: bool,
}

impl Drop for TransactionUnlocker<'_> {
    fn drop(&mut self) {
        self.lock.set_active(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, CoreResult};

    #[test]
    fn unlocker_restores_previous_state() {
        let lock = TransactionLock::new(false);
        {
            let _unlocker = lock.unlock();
            assert!(lock.is_active());
        }
        assert!(!lock.is_active());
    }

    #[test]
    fn unlocker_restores_on_error_path() {
        fn fails(lock: &TransactionLock) -> CoreResult<()> {
            let _unlocker = lock.unlock();
            Err(CoreError::structural("boom"))
        }

        let lock = TransactionLock::new(false);
        assert!(fails(&lock).is_err());
        assert!(!lock.is_active());
    }

    #[test]
    fn unlocking_an_active_lock_keeps_it_active() {
        let lock = TransactionLock::new(true);
        drop(lock.unlock());
        assert!(lock.is_active());
    }
}
