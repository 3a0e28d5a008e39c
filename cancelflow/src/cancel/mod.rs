//! Hierarchical cooperative cancellation.
//!
//! This module provides:
//! - CancellationToken, the opaque per-manager callback handle
//! - CancellationManager, the callback registry and cancel state machine
//! - CallbackGuard for scope-bound registrations

#[cfg(test)]
mod cancel_tests;
mod guard;
mod manager;
mod token;

pub use guard::CallbackGuard;
pub use manager::{CancelCallback, CancellationManager};
pub use token::CancellationToken;
