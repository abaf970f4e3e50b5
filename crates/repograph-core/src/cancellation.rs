//! Cancellation support for indexing runs
//!
//! Stops new embedding requests and abandons in-flight similarity work.
//! Results that were already computed are kept.

use tokio_util::sync::CancellationToken;

/// Wrapper around CancellationToken for run-level cancellation
#[derive(Clone)]
pub struct RunCancellation {
    token: CancellationToken,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Cancel all work using this token
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Get a child token for a subtask
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Default for RunCancellation {
    fn default() -> Self {
        Self::new()
    }
}
