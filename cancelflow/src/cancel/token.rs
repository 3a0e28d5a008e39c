//! Opaque handles identifying registered cancellation callbacks.

/// An opaque handle identifying one registered callback within a manager.
///
/// Tokens are issued by [`CancellationManager::issue_token`], are unique
/// within the issuing manager, and are meaningless to every other manager.
///
/// [`CancellationManager::issue_token`]: super::CancellationManager::issue_token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancellationToken(i64);

impl CancellationToken {
    /// The reserved "no token" sentinel for operations that are not
    /// cancellable. Never returned by issuance and never valid for lookup.
    pub const INVALID: Self = Self(-1);

    /// Returns true unless this is the [`INVALID`](Self::INVALID) sentinel.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }

    pub(crate) fn from_index(index: i64) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> i64 {
        self.0
    }
}
