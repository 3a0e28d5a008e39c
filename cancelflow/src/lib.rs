//! # Cancelflow
//!
//! Hierarchical, thread-safe cooperative cancellation for long-running work.
//!
//! Cancelflow provides a small set of primitives for aborting in-flight
//! operations from the outside:
//!
//! - **Token-keyed callbacks**: operations register an abort callback under
//!   an opaque token and deregister it on normal completion
//! - **Exactly-once sweeps**: cancellation runs every registered callback
//!   exactly once, outside the manager's lock, so callbacks may re-enter
//! - **Safe deregistration**: removing a callback during a concurrent sweep
//!   blocks until the sweep finishes, so callers never free state a pending
//!   callback might still touch
//! - **Manager trees**: cancelling a parent cascades to every live child
//! - **Deadline triggers**: an external timer utility for timeout-driven
//!   cancellation
//!
//! ## Quick Start
//!
//! ```rust
//! use cancelflow::prelude::*;
//!
//! let manager = CancellationManager::new();
//! let token = manager.issue_token();
//!
//! let registered = manager.register_callback(token, || {
//!     // abort the operation tied to this token
//! });
//! assert!(registered);
//!
//! manager.start_cancel();
//! assert!(manager.is_cancelled());
//! ```
//!
//! Cancellation does not itself interrupt running work; it only delivers the
//! callback. Stopping in-flight computation is up to whoever registered it.

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancel;
pub mod errors;
pub mod notify;
pub mod timer;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancel::{
        CallbackGuard, CancelCallback, CancellationManager, CancellationToken,
    };
    pub use crate::errors::CancelError;
    pub use crate::notify::Notification;
    pub use crate::timer::{cancel_after, CancelTimer};
}
