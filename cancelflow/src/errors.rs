//! Error types for cancelflow.
//!
//! The core manager API reports outcomes as booleans; these types back the
//! `Result`-returning convenience surface only.

use thiserror::Error;

/// Errors surfaced by the `Result`-returning registration helpers.
#[derive(Debug, Error)]
pub enum CancelError {
    /// Cancellation had already started or finished when the callback was
    /// offered for registration. The caller must react as if the callback
    /// had already fired.
    #[error("cancellation already started; callback `{name}` was not registered")]
    AlreadyCancelled {
        /// Diagnostic name given at the registration site.
        name: String,
    },
}
