//! EventHandler port - A consumer bound to a (topic, group) pair.
//!
//! The dispatcher calls `handle` once per delivered envelope (and again on
//! each retry). Handlers report an `Outcome` rather than raising, so the
//! recoverer sees every failure already classified.

use async_trait::async_trait;

use crate::domain::foundation::EventEnvelope;
use crate::domain::pipeline::Outcome;

/// Handler for processing delivered envelopes.
///
/// Implementations should be:
/// - **Idempotent** - A redelivered envelope must not repeat the side effect
/// - **Non-retrying** - Retries are the recoverer's job
///
/// # Example
///
/// ```ignore
/// dispatcher.register("product-created-events-topic", "notifications", Arc::new(orchestrator));
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one delivery of an envelope.
    async fn handle(&self, envelope: &EventEnvelope) -> Outcome;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
