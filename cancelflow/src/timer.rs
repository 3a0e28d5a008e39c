//! Deadline-driven cancellation triggers.
//!
//! The manager itself has no built-in timer; timeout semantics come from an
//! external trigger calling [`CancellationManager::start_cancel`]. This
//! module packages that trigger as a spawned tokio task.
//!
//! [`CancellationManager::start_cancel`]: crate::cancel::CancellationManager::start_cancel

use crate::cancel::CancellationManager;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a pending deadline trigger.
///
/// The trigger is aborted when the handle is dropped or
/// [`disarm`](Self::disarm)ed; once the deadline fires, the handle has no
/// further effect.
pub struct CancelTimer {
    handle: JoinHandle<()>,
}

impl CancelTimer {
    /// Aborts the pending trigger without cancelling the manager.
    pub fn disarm(&self) {
        self.handle.abort();
    }

    /// Returns true once the trigger has fired or been disarmed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CancelTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for CancelTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelTimer")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Triggers `manager.start_cancel()` once `delay` has elapsed.
///
/// The spawned task holds only a weak reference; if the manager is dropped
/// first, the deadline fires into nothing. Must be called from within a
/// tokio runtime.
pub fn cancel_after(manager: &CancellationManager, delay: Duration) -> CancelTimer {
    let target = manager.weak_core();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(core) = target.upgrade() {
            core.start_cancel();
        }
    });
    CancelTimer { handle }
}
