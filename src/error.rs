//! Error types for the admission core.
//!
//! Two strata: [`ConfigError`]
//! is fatal and only ever produced while building a pool (condition tree,
//! executor hierarchy, expression parsing); [`AdmissionError`] and
//! [`RejectedSubmission`] are runtime outcomes surfaced to callers.

use thiserror::Error;

/// Fatal errors raised while constructing a pool from configuration.
/// None of these are recoverable — the caller should refuse to start.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("executor hierarchy invalid: {0}")]
    InvalidHierarchy(String),

    #[error("cycle detected in executor hierarchy at {0}")]
    CycleDetected(String),

    #[error("child executor {child} has tps {child_tps} exceeding parent {parent} tps {parent_tps}")]
    ChildTpsExceedsParent {
        child: String,
        child_tps: u64,
        parent: String,
        parent_tps: u64,
    },

    #[error("priority tree and condition-expr syntaxes were mixed within one rule set")]
    SyntaxMismatch,

    #[error("unknown variable reference: {0}")]
    UnknownReference(String),

    #[error("bad expression at position {position}: {message}")]
    BadExpression { position: usize, message: String },

    #[error("priority tree exceeds max depth of {max}: {actual}")]
    TreeTooDeep { max: usize, actual: usize },

    #[error("priority-strategy type {0:?} is reserved and not implemented")]
    UnimplementedStrategy(String),

    #[error("invalid regex pattern {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// The reason a submission was rejected, as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("pool has been shut down")]
    Shutdown,

    #[error("executor backlog is full")]
    BacklogFull,

    #[error("unknown executor")]
    UnknownExecutor,
}

/// A rejected submission. Never swallowed, never retried by the core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("submission rejected: {reason}")]
pub struct RejectedSubmission {
    pub reason: RejectReason,
}

impl RejectedSubmission {
    pub fn new(reason: RejectReason) -> Self {
        Self { reason }
    }

    /// A caller may reasonably retry `BacklogFull` later; the other two
    /// reasons will not change by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.reason, RejectReason::BacklogFull)
    }
}

/// Runtime errors produced by the dispatch façade. `TaskContext` and
/// `BoxedRunnable` are both owned values in this crate's API, so there is no
/// null/empty case to reject at submission time; every outcome maps back to
/// a rejection the caller can act on.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Rejected(#[from] RejectedSubmission),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_full_is_retryable() {
        let r = RejectedSubmission::new(RejectReason::BacklogFull);
        assert!(r.is_retryable());
        let r = RejectedSubmission::new(RejectReason::Shutdown);
        assert!(!r.is_retryable());
    }

    #[test]
    fn display_messages_are_stable() {
        assert!(ConfigError::SyntaxMismatch.to_string().contains("mixed"));
        assert!(RejectReason::UnknownExecutor
            .to_string()
            .contains("unknown"));
    }
}
