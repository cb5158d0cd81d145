//! Error classification: maps a failure to Retryable or NotRetryable.
//!
//! Only failures to *reach* a collaborator are transient. A collaborator that
//! answered, even with a 5xx, is treated as having given a final answer.

use super::failure::{FailureCause, InvocationError, LedgerError, Retryability};

/// Classifies a failure cause. Pure; no I/O.
pub fn classify(cause: &FailureCause) -> Retryability {
    match cause {
        FailureCause::Invocation(err) => classify_invocation(err),
        FailureCause::Ledger(err) => classify_ledger(err),
        FailureCause::MalformedPayload(_) => Retryability::NotRetryable,
    }
}

fn classify_invocation(err: &InvocationError) -> Retryability {
    match err {
        InvocationError::Connectivity(_) | InvocationError::Timeout { .. } => Retryability::Retryable,
        // 5xx is permanent by policy; retry it via `retry_not_retryable`.
        InvocationError::ServerError { .. } => Retryability::NotRetryable,
        InvocationError::Rejected { .. } | InvocationError::Other(_) => Retryability::NotRetryable,
    }
}

fn classify_ledger(err: &LedgerError) -> Retryability {
    match err {
        LedgerError::DuplicateKey { .. } => Retryability::NotRetryable,
        LedgerError::Unavailable(_) => Retryability::Retryable,
        LedgerError::Storage(_) => Retryability::NotRetryable,
    }
}
