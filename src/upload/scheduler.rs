//! Concurrency control for file transfers.
//!
//! At most [`MAX_PARALLEL_UPLOADS`] transfers run at once; further started
//! items wait on the semaphore instead of being dropped.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maximum number of transfers in flight at once.
pub const MAX_PARALLEL_UPLOADS: usize = 3;

// ─────────────────────────────────────────────────────────────────────────────
// UploadScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Limits the number of concurrent file transfers.
///
/// Permits release automatically on drop, so a panicking or cancelled
/// transfer never leaks its slot.
#[derive(Clone)]
pub struct UploadScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl UploadScheduler {
    /// Creates a scheduler with the given transfer cap.
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

    /// Acquires a transfer slot, waiting while all are in use.
    pub async fn acquire(&self) -> UploadPermit {
        // The semaphore is never closed, so acquire_owned cannot fail
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore closed unexpectedly");

        UploadPermit { _permit: permit }
    }

    /// Number of transfers currently holding a slot.
    pub fn active_transfers(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    /// Number of free transfer slots.
    pub fn available_slots(&self) -> usize {
        self.sem.available_permits()
    }
}

impl Default for UploadScheduler {
    fn default() -> Self {
        Self::new(MAX_PARALLEL_UPLOADS)
    }
}

/// An occupied transfer slot; released when dropped.
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
