//! Pipeline vocabulary: outcomes, ledger records, failures and their classification.

mod classifier;
mod failure;
mod outcome;

pub use classifier::classify;
pub use failure::{ConsumeFailure, FailureCause, InvocationError, LedgerError, Retryability};
pub use outcome::{Completion, Outcome, ProcessedEventRecord, ProcessingState};
