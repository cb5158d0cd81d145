//! Foundation module - Shared domain primitives.
//!
//! Contains value objects, identifiers, the event envelope, and error types
//! that form the vocabulary of the pipeline.

mod errors;
mod events;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use events::{partition_for, DomainEvent, EventEnvelope, MessageId};
pub use timestamp::Timestamp;
