//! Bounded admission for concurrent transfers.
//!
//! The scheduler enforces the batch's `max_concurrent` limit: at most that
//! many transfers hold a permit at any time. Queueing order is not the
//! scheduler's concern — the coordinator owns the FIFO pending queue and
//! asks for a permit only when promoting the queue head.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

// ─────────────────────────────────────────────────────────────────────────────
// UploadScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Admission limiter for one batch run.
///
/// The limit is fixed at construction and immutable for the run. Permits
/// release their slot when dropped, so a transfer that ends on any path
/// (success, failure, cancellation) always frees its slot.
#[derive(Clone)]
pub struct UploadScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl UploadScheduler {
    /// Creates a scheduler allowing `max_concurrent` simultaneous transfers.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Attempts to admit one transfer without waiting.
    ///
    /// Returns `Some(permit)` if a slot is free, `None` if the active set
    /// is full.
    pub fn try_admit(&self) -> Option<UploadPermit> {
        match self.sem.clone().try_acquire_owned() {
            Ok(permit) => Some(UploadPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => None,
            // We never close the semaphore.
            Err(TryAcquireError::Closed) => None,
        }
    }

    /// Number of transfers currently holding a permit.
    pub fn active(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }

    /// The configured limit.
    pub fn max_concurrent(&self) -> usize {
        self.max
    }
}

/// An occupied transfer slot; released when dropped.
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "max_concurrent must be greater than 0")]
    fn zero_limit_panics() {
        let _ = UploadScheduler::new(0);
    }

    #[test]
    fn admits_up_to_the_limit() {
        let scheduler = UploadScheduler::new(2);

        let first = scheduler.try_admit();
        assert!(first.is_some(), "first admit should succeed");
        let second = scheduler.try_admit();
        assert!(second.is_some(), "second admit should succeed");

        assert!(
            scheduler.try_admit().is_none(),
            "third admit must be refused at limit 2"
        );
        assert_eq!(scheduler.active(), 2);
        assert_eq!(scheduler.available(), 0);
    }

    #[test]
    fn dropping_a_permit_frees_the_slot() {
        let scheduler = UploadScheduler::new(1);

        let permit = scheduler.try_admit().expect("slot should be free");
        assert!(scheduler.try_admit().is_none());

        drop(permit);
        assert_eq!(scheduler.available(), 1);
        assert!(scheduler.try_admit().is_some());
    }

    #[test]
    fn clones_share_the_same_slots() {
        let a = UploadScheduler::new(2);
        let b = a.clone();

        let _p = a.try_admit().unwrap();
        assert_eq!(b.active(), 1);
        assert_eq!(b.available(), 1);
        assert_eq!(b.max_concurrent(), 2);
    }
}
