//! SideEffectInvoker port - The external operation performed per event.

use async_trait::async_trait;

use crate::domain::foundation::EventEnvelope;
use crate::domain::pipeline::InvocationError;

/// Performs one synchronous call to an external collaborator.
///
/// Implementations must:
/// - Bound the call with a timeout and report it as `InvocationError::Timeout`
/// - Not retry internally (retry policy belongs to the transport)
/// - Separate unreachable collaborators from collaborators that answered with
///   a failure status, so the classifier can decide retryability
#[async_trait]
pub trait SideEffectInvoker: Send + Sync {
    async fn invoke(&self, envelope: &EventEnvelope) -> Result<(), InvocationError>;
}
