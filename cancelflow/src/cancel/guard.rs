//! Scope-bound callback registration.

use super::manager::Core;
use super::token::CancellationToken;
use std::sync::Arc;

/// Deregisters a cancellation callback when dropped.
///
/// Obtained from [`CancellationManager::register_guard`]. Dropping the guard
/// uses the blocking deregistration path, so once drop returns the callback
/// has either run to completion or will never run. Do not drop a guard from
/// within a cancellation callback.
///
/// [`CancellationManager::register_guard`]: super::CancellationManager::register_guard
pub struct CallbackGuard {
    core: Arc<Core>,
    token: CancellationToken,
    armed: bool,
}

impl CallbackGuard {
    pub(super) fn new(core: Arc<Core>, token: CancellationToken) -> Self {
        Self {
            core,
            token,
            armed: true,
        }
    }

    /// Returns the token the callback was registered under.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token
    }

    /// Disarms the guard, leaving the callback registered.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.core.deregister_callback(self.token);
        }
    }
}

impl std::fmt::Debug for CallbackGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackGuard")
            .field("token", &self.token)
            .field("armed", &self.armed)
            .finish()
    }
}
