//! Tracking of the in-flight restore attempt.
//!
//! The agent restores into a single data directory, so at most one attempt
//! runs at a time. Each attempt gets a child of the shutdown token: shutting
//! the agent down or cancelling through the API both stop it.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug)]
struct RunningRestore {
    attempt_id: String,
    cancel: CancellationToken,
}

/// Tracks the running restore and provides its cancellation
#[derive(Clone, Default)]
pub struct RestoreTracker {
    current: Arc<Mutex<Option<RunningRestore>>>,
}

/// Registration of a running attempt, released on drop
pub struct RestoreSlot {
    tracker: RestoreTracker,
    attempt_id: String,
    cancel: CancellationToken,
}

impl RestoreSlot {
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RestoreSlot {
    fn drop(&mut self) {
        let mut current = self.tracker.lock();
        if current.as_ref().is_some_and(|r| r.attempt_id == self.attempt_id) {
            *current = None;
        }
    }
}

impl RestoreTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningRestore>> {
        // The guarded value stays consistent even if a holder panicked
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new attempt, or `None` if one is already running
    pub fn begin(&self, parent: &CancellationToken) -> Option<RestoreSlot> {
        let mut current = self.lock();
        if current.is_some() {
            return None;
        }

        let attempt_id = Uuid::new_v4().to_string();
        let cancel = parent.child_token();
        *current = Some(RunningRestore {
            attempt_id: attempt_id.clone(),
            cancel: cancel.clone(),
        });

        Some(RestoreSlot {
            tracker: self.clone(),
            attempt_id,
            cancel,
        })
    }

    /// Cancel the running attempt, returning its id
    pub fn cancel(&self) -> Option<String> {
        let current = self.lock();
        current.as_ref().map(|running| {
            running.cancel.cancel();
            running.attempt_id.clone()
        })
    }

    /// Id of the running attempt, if any
    pub fn running_attempt(&self) -> Option<String> {
        self.lock().as_ref().map(|running| running.attempt_id.clone())
    }

    pub fn running_count(&self) -> usize {
        usize::from(self.lock().is_some())
    }
}
