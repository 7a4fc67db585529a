//! Error taxonomy (spec.md §7) and its propagation policy.
//!
//! Grounded on the teacher's `types.rs` `PublishError`/`PreflightError`
//! pattern: one `thiserror` enum per cross-cutting concern, matched by the
//! caller to decide retry vs. fatal vs. mark-terminal behavior, rather than
//! `anyhow::Error` everywhere (`anyhow` is still used inside modules for
//! ad-hoc I/O context; this enum is the taxonomy the *dispatcher* switches
//! on).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lock contention: {0}")]
    LockContention(#[from] anyhow::Error),

    #[error("platform API error: {0}")]
    PlatformApi(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("subprocess timed out: {0}")]
    SubprocessTimeout(String),

    #[error("subprocess crashed: {0}")]
    SubprocessCrash(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("needs user reply: {0}")]
    NeedsUserReply(String),

    #[error("state corrupted at {path}: {detail}")]
    StateCorruption { path: String, detail: String },

    #[error("webhook signature invalid")]
    WebhookSignature,

    #[error("webhook payload error: {0}")]
    WebhookPayload(String),
}

impl RunnerError {
    /// Whether the dispatcher should retry this outcome transparently
    /// rather than mark the work item terminal (spec.md §7 propagation
    /// policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunnerError::LockContention(_)
                | RunnerError::PlatformApi(_)
                | RunnerError::Network(_)
                | RunnerError::RateLimited(_)
                | RunnerError::Quota(_)
                | RunnerError::CapacityExhausted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_and_capacity_are_retryable_not_terminal() {
        assert!(RunnerError::Quota("resume later".into()).is_retryable());
        assert!(RunnerError::CapacityExhausted("no capacity".into()).is_retryable());
    }

    #[test]
    fn execution_error_is_not_retryable() {
        assert!(!RunnerError::ExecutionError("boom".into()).is_retryable());
    }
}
