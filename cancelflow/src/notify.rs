//! One-shot notification primitive.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

/// A notification that is signalled exactly once and awaited by any number
/// of threads.
///
/// Waiters that arrive before the signal block until it fires; waiters that
/// arrive after return immediately. There is no way to reset a notification.
#[derive(Default)]
pub struct Notification {
    /// Lock-free fast path for late waiters and probes.
    notified: AtomicBool,
    /// Slow path: waiters park on the condvar under this lock.
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Notification {
    /// Creates an unsignalled notification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the notification, waking every current and future waiter.
    ///
    /// Calling this more than once is a contract violation.
    pub fn notify(&self) {
        let mut signalled = self.signalled.lock();
        debug_assert!(!*signalled, "notification signalled twice");
        *signalled = true;
        self.notified.store(true, Ordering::Release);
        drop(signalled);
        self.cond.notify_all();
    }

    /// Blocks until the notification is signalled.
    ///
    /// Returns immediately if it already was.
    pub fn wait(&self) {
        if self.notified.load(Ordering::Acquire) {
            return;
        }
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
    }

    /// Returns true if the notification has been signalled.
    #[must_use]
    pub fn has_been_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("notified", &self.has_been_notified())
            .finish()
    }
}
