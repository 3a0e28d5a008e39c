//! The cancellation manager: token issuance, callback registry, and the
//! cancel state machine.

use super::guard::CallbackGuard;
use super::token::CancellationToken;
use crate::errors::CancelError;
use crate::notify::Notification;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use tracing::warn;

/// A callback invoked at most once when cancellation is triggered.
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// Registration state, allocated lazily so managers that never see a
/// registration or a cancellation stay cheap.
struct CallbackState {
    callbacks: HashMap<CancellationToken, CancelCallback>,
    /// Fired exactly once, after the sweep's callback phase completes.
    done: Arc<Notification>,
}

impl CallbackState {
    fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            done: Arc::new(Notification::new()),
        }
    }
}

struct Inner {
    /// True strictly while a sweep is invoking callbacks.
    cancelling: bool,
    state: Option<CallbackState>,
}

/// The shared heart of a manager. Handles own it via `Arc`; cascade
/// callbacks and timers observe it via `Weak` only.
pub(crate) struct Core {
    inner: Mutex<Inner>,
    /// Terminal flag, published with release ordering once a sweep has fully
    /// completed so readers observe every callback's side effects.
    cancelled: AtomicBool,
    next_token: AtomicI64,
}

impl Core {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cancelling: false,
                state: None,
            }),
            cancelled: AtomicBool::new(false),
            next_token: AtomicI64::new(0),
        }
    }

    fn issue_token(&self) -> CancellationToken {
        CancellationToken::from_index(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn register_callback(&self, token: CancellationToken, callback: CancelCallback) -> bool {
        debug_assert!(token.is_valid(), "cannot register the invalid token");
        debug_assert!(
            token.index() < self.next_token.load(Ordering::Relaxed),
            "token was not issued by this manager"
        );
        let mut inner = self.inner.lock();
        let should_register = !self.cancelled.load(Ordering::Relaxed) && !inner.cancelling;
        if should_register {
            let state = inner.state.get_or_insert_with(CallbackState::new);
            let previous = state.callbacks.insert(token, callback);
            debug_assert!(
                previous.is_none(),
                "token already has a registered callback"
            );
        }
        should_register
    }

    pub(crate) fn deregister_callback(&self, token: CancellationToken) -> bool {
        let mut inner = self.inner.lock();
        if self.cancelled.load(Ordering::Relaxed) {
            return false;
        }
        if inner.cancelling {
            // A sweep is in flight on some thread. Wait for its callback
            // phase to finish so the caller cannot free state a pending
            // callback may still be using.
            let done = inner.state.as_ref().map(|state| Arc::clone(&state.done));
            drop(inner);
            if let Some(done) = done {
                done.wait();
            }
            return false;
        }
        if let Some(state) = inner.state.as_mut() {
            state.callbacks.remove(&token);
        }
        true
    }

    fn try_deregister_callback(&self, token: CancellationToken) -> bool {
        let mut inner = self.inner.lock();
        if self.cancelled.load(Ordering::Relaxed) || inner.cancelling {
            return false;
        }
        if let Some(state) = inner.state.as_mut() {
            state.callbacks.remove(&token);
        }
        true
    }

    pub(crate) fn start_cancel(&self) {
        let (callbacks, done) = {
            let mut inner = self.inner.lock();
            if self.cancelled.load(Ordering::Relaxed) || inner.cancelling {
                return;
            }
            inner.cancelling = true;
            match inner.state.as_mut() {
                Some(state) => (
                    std::mem::take(&mut state.callbacks),
                    Some(Arc::clone(&state.done)),
                ),
                None => (HashMap::new(), None),
            }
        };

        // Callbacks run without the lock so they may re-enter the manager:
        // registration fails, deregistration blocks on `done`, and a nested
        // start_cancel is a no-op. The moved-out entries stay valid because
        // concurrent deregistration waits for `done` before returning.
        for (_, callback) in callbacks {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                warn!("Cancellation callback panicked: {:?}", panic);
            }
        }

        {
            let mut inner = self.inner.lock();
            inner.cancelling = false;
            self.cancelled.store(true, Ordering::Release);
        }

        if let Some(done) = done {
            done.notify();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_cancelling(&self) -> bool {
        self.inner.lock().cancelling
    }

    fn has_state(&self) -> bool {
        self.inner.lock().state.is_some()
    }
}

/// Link from a child handle to the parent core it cascades from.
struct ParentLink {
    core: Arc<Core>,
    token: CancellationToken,
}

/// A hierarchical, thread-safe cancellation manager.
///
/// Operations obtain a token via [`issue_token`](Self::issue_token), register
/// an abort callback under it, and deregister it on normal completion.
/// [`start_cancel`](Self::start_cancel) runs every registered callback
/// exactly once; afterwards the manager is permanently cancelled and rejects
/// further registrations.
///
/// Managers form trees via [`child`](Self::child): cancelling a parent
/// cancels every live child. Each handle is the sole owner of its manager
/// and is deliberately not `Clone`; share it behind an `Arc` (or by
/// reference) if several threads drive the same manager.
///
/// # Dropping runs pending callbacks
///
/// If a manager still holds registered callbacks when dropped, drop forces a
/// final cancellation sweep so that no callback is silently discarded. User
/// code therefore runs from `Drop`; deregister callbacks on normal
/// completion if that is not wanted.
pub struct CancellationManager {
    core: Arc<Core>,
    parent: Option<ParentLink>,
}

impl CancellationManager {
    /// Creates a root manager with no parent.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core::new()),
            parent: None,
        }
    }

    /// Creates a child manager that is cancelled whenever `self` is.
    ///
    /// The child registers a cascade callback on this manager. If this
    /// manager is already cancelling or cancelled, the child is born
    /// directly in the cancelled state.
    #[must_use]
    pub fn child(&self) -> Self {
        let token = self.core.issue_token();
        let child_core = Arc::new(Core::new());

        // The parent's callback table is the only record of the child, and
        // it must not keep the child alive.
        let cascade: Weak<Core> = Arc::downgrade(&child_core);
        let registered = self.core.register_callback(
            token,
            Box::new(move || {
                if let Some(core) = cascade.upgrade() {
                    core.start_cancel();
                }
            }),
        );
        if !registered {
            child_core.cancelled.store(true, Ordering::Release);
        }

        Self {
            core: child_core,
            parent: Some(ParentLink {
                core: Arc::clone(&self.core),
                token,
            }),
        }
    }

    /// Atomically returns the next unused token for this manager.
    ///
    /// Never returns [`CancellationToken::INVALID`].
    pub fn issue_token(&self) -> CancellationToken {
        self.core.issue_token()
    }

    /// Registers `callback` under `token`, to be invoked if cancellation is
    /// triggered.
    ///
    /// Returns false without storing anything if cancellation has already
    /// started or finished; the caller must then react as if the callback
    /// had fired. Registering a token twice, or a token not issued by this
    /// manager, is a contract violation.
    #[must_use = "a false return means cancellation already started; react as if the callback had fired"]
    pub fn register_callback<F>(&self, token: CancellationToken, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.register_callback(token, Box::new(callback))
    }

    /// Like [`register_callback`](Self::register_callback), but logs a
    /// warning naming the callback and returns an error when registration
    /// is rejected.
    pub fn register_callback_with_logging<F>(
        &self,
        token: CancellationToken,
        name: &str,
        callback: F,
    ) -> Result<(), CancelError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.register_callback(token, callback) {
            Ok(())
        } else {
            warn!(callback = name, "cancellation already started; callback rejected");
            Err(CancelError::AlreadyCancelled {
                name: name.to_string(),
            })
        }
    }

    /// Issues a token, registers `callback` under it, and returns a guard
    /// that deregisters the callback when dropped.
    pub fn register_guard<F>(&self, name: &str, callback: F) -> Result<CallbackGuard, CancelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.issue_token();
        self.register_callback_with_logging(token, name, callback)?;
        Ok(CallbackGuard::new(Arc::clone(&self.core), token))
    }

    /// Removes the callback registered under `token` before it can fire,
    /// when possible.
    ///
    /// Returns true if the callback was removed and is guaranteed never to
    /// run. If a sweep is in flight, **blocks** until its callback phase has
    /// completed, then returns false; by the time this returns, the callback
    /// either ran to completion or never will. Returns false immediately if
    /// the manager is already cancelled.
    ///
    /// Must not be called from within a callback; use
    /// [`try_deregister_callback`](Self::try_deregister_callback) there.
    #[must_use = "a false return means the callback ran (or will never run); true means it was removed"]
    pub fn deregister_callback(&self, token: CancellationToken) -> bool {
        self.core.deregister_callback(token)
    }

    /// Non-blocking variant of
    /// [`deregister_callback`](Self::deregister_callback): returns false
    /// immediately instead of waiting if a sweep is in flight or complete.
    #[must_use = "a false return means the callback may run (or already has)"]
    pub fn try_deregister_callback(&self, token: CancellationToken) -> bool {
        self.core.try_deregister_callback(token)
    }

    /// Triggers a cancellation sweep: every registered callback runs exactly
    /// once, in unspecified order, without the manager's lock held.
    ///
    /// Idempotent; a no-op if cancellation already started or finished.
    /// Callbacks may re-enter this manager freely.
    pub fn start_cancel(&self) {
        self.core.start_cancel();
    }

    /// Returns true once a cancellation sweep has fully completed.
    ///
    /// Observing true implies every callback has finished and its side
    /// effects are visible to this thread.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Returns true strictly while a sweep is invoking callbacks.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.core.is_cancelling()
    }

    pub(crate) fn weak_core(&self) -> Weak<Core> {
        Arc::downgrade(&self.core)
    }
}

impl Default for CancellationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancellationManager {
    /// Deregisters the cascade callback from the parent (blocking, so
    /// teardown cannot race a parent-driven cascade into this manager),
    /// then forces a final sweep if any callbacks were ever registered.
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            let _ = parent.core.deregister_callback(parent.token);
        }
        if self.core.has_state() {
            self.core.start_cancel();
        }
    }
}

impl std::fmt::Debug for CancellationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationManager")
            .field("cancelled", &self.is_cancelled())
            .field("cancelling", &self.is_cancelling())
            .field("is_child", &self.parent.is_some())
            .finish()
    }
}
