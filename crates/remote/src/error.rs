//! Remote-call error type.

use thiserror::Error;

/// Errors returned by a [`crate::WorkflowNodeApi`] call.
///
/// The reconciler uses the variant to decide retry behaviour:
/// - `Unavailable`: transient, the call is retried with exponential back-off.
/// - `Rejected` / `NotFound`: permanent, the operation is reported as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport-level failure (connection reset, 502/503, ...).
    #[error("remote service unavailable: {0}")]
    Unavailable(String),

    /// The server understood the request and refused it.
    #[error("request rejected by server: {0}")]
    Rejected(String),

    /// The referenced workflow node does not exist on the server.
    #[error("workflow node {0} not found")]
    NotFound(u64),
}

impl RemoteError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
