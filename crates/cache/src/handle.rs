//! Discardable handles
//!
//! A discardable texture is locked and unlocked from two sides: the client
//! that issues commands and the service that owns the GPU objects. Both sides
//! observe the same lock counter, which in a multi-process setup lives in a
//! shared memory cell. Here the cell is modelled as [`SharedLockCount`], and
//! each side talks to it through its own endpoint type.
//!
//! Counter states:
//!
//! - `> 0`: locked by the client, the service or both
//! - `0`: unlocked, the service may delete the texture
//! - [`DELETED`]: the service deleted the texture, the client must not
//!   lock it again and has to recreate it instead

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Counter value marking a handle whose texture has been deleted.
pub const DELETED: i32 = -1;

/// The lock counter shared by a client and a service handle.
///
/// All updates are atomic compare-and-swap loops so that transitions
/// into and out of the deleted state cannot race with a concurrent lock.
#[derive(Debug, Clone)]
pub struct SharedLockCount {
    cell: Arc<AtomicI32>,
}

impl SharedLockCount {
    /// Create a counter that starts out locked once.
    pub fn new_locked() -> Self {
        Self {
            cell: Arc::new(AtomicI32::new(1)),
        }
    }

    /// Current raw counter value.
    pub fn value(&self) -> i32 {
        self.cell.load(Ordering::Acquire)
    }

    /// Increment unless the handle was deleted. Returns false if deleted.
    fn increment(&self) -> bool {
        self.cell
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == DELETED {
                    None
                } else {
                    Some(count + 1)
                }
            })
            .is_ok()
    }

    /// Decrement a positive count. Returns the new count, or `None` if the
    /// counter was not positive and has been left untouched.
    fn decrement(&self) -> Option<i32> {
        self.cell
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count > 0 {
                    Some(count - 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|previous| previous - 1)
    }

    /// Move from unlocked to deleted.
    fn try_delete(&self) -> bool {
        self.cell
            .compare_exchange(0, DELETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn force_delete(&self) {
        self.cell.store(DELETED, Ordering::Release);
    }

    fn is_shared_with(&self, other: &SharedLockCount) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

/// Create a client/service handle pair sharing one counter, initially locked.
///
/// A freshly created discardable texture is locked by its creator, so the
/// counter starts at one.
pub fn create_locked_handles() -> (ClientDiscardableHandle, ServiceDiscardableHandle) {
    let count = SharedLockCount::new_locked();
    (
        ClientDiscardableHandle {
            count: count.clone(),
        },
        ServiceDiscardableHandle { count },
    )
}

/// Client side of a discardable handle.
#[derive(Debug, Clone)]
pub struct ClientDiscardableHandle {
    count: SharedLockCount,
}

impl ClientDiscardableHandle {
    /// Lock the texture before using it.
    ///
    /// Returns false if the service already deleted the texture, in which
    /// case the client has to create a new one.
    pub fn lock(&self) -> bool {
        self.count.increment()
    }

    /// True once the service has deleted the texture.
    pub fn is_deleted(&self) -> bool {
        self.count.value() == DELETED
    }

    /// True if the client or the service currently holds a lock.
    pub fn is_locked_by_client_or_service(&self) -> bool {
        self.count.value() > 0
    }
}

/// Service side of a discardable handle, stored in the cache entry.
#[derive(Debug, Clone)]
pub struct ServiceDiscardableHandle {
    count: SharedLockCount,
}

impl ServiceDiscardableHandle {
    /// Build a service handle over an existing shared counter.
    pub fn new(count: SharedLockCount) -> Self {
        Self { count }
    }

    /// Increment the shared count.
    pub fn lock(&self) {
        if !self.count.increment() {
            log::warn!("service lock on a deleted discardable handle");
        }
    }

    /// Decrement the shared count. Returns true if it reached zero.
    ///
    /// An unlock of a handle that is not locked leaves the counter
    /// untouched and returns false.
    pub fn unlock(&self) -> bool {
        match self.count.decrement() {
            Some(remaining) => remaining == 0,
            None => {
                log::warn!(
                    "unlock of a discardable handle that is not locked (count {})",
                    self.count.value()
                );
                false
            }
        }
    }

    /// True if the client or the service currently holds a lock.
    pub fn is_locked_by_client_or_service(&self) -> bool {
        self.count.value() > 0
    }

    /// True once the handle reached the deleted state.
    pub fn is_deleted(&self) -> bool {
        self.count.value() == DELETED
    }

    /// Atomically mark an unlocked handle as deleted.
    ///
    /// Fails if the client locked the handle in the meantime.
    pub fn try_delete(&self) -> bool {
        self.count.try_delete()
    }

    /// Mark the handle deleted regardless of its lock state.
    pub fn force_delete(&self) {
        self.count.force_delete();
    }

    /// True if both handles observe the same counter.
    pub fn shares_count_with(&self, other: &ServiceDiscardableHandle) -> bool {
        self.count.is_shared_with(&other.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pair_is_locked() {
        let (client, service) = create_locked_handles();
        assert!(client.is_locked_by_client_or_service());
        assert!(service.is_locked_by_client_or_service());
        assert!(!client.is_deleted());
    }

    #[test]
    fn test_unlock_reports_zero() {
        let (client, service) = create_locked_handles();
        assert!(client.lock());

        assert!(!service.unlock());
        assert!(service.is_locked_by_client_or_service());
        assert!(service.unlock());
        assert!(!service.is_locked_by_client_or_service());
    }

    #[test]
    fn test_service_lock() {
        let (_client, service) = create_locked_handles();
        assert!(service.unlock());
        service.lock();
        assert!(service.is_locked_by_client_or_service());
    }

    #[test]
    fn test_try_delete_requires_unlocked() {
        let (client, service) = create_locked_handles();
        assert!(!service.try_delete());

        assert!(service.unlock());
        assert!(service.try_delete());
        assert!(client.is_deleted());
        assert!(!client.lock());
    }

    #[test]
    fn test_client_relock_blocks_delete() {
        let (client, service) = create_locked_handles();
        assert!(service.unlock());
        assert!(client.lock());
        assert!(!service.try_delete());
        assert!(!client.is_deleted());
    }

    #[test]
    fn test_unlock_without_lock_is_ignored() {
        let (_client, service) = create_locked_handles();
        assert!(service.unlock());
        assert!(!service.unlock());
        assert_eq!(service.count.value(), 0);
    }

    #[test]
    fn test_force_delete() {
        let (client, service) = create_locked_handles();
        service.force_delete();
        assert!(client.is_deleted());
        assert!(!client.is_locked_by_client_or_service());
    }

    #[test]
    fn test_shared_count_identity() {
        let (_c1, s1) = create_locked_handles();
        let (_c2, s2) = create_locked_handles();
        assert!(s1.shares_count_with(&s1.clone()));
        assert!(!s1.shares_count_with(&s2));
    }
}
