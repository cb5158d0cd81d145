//! The consume side (orchestrator, recoverer, dispatcher) and the producer.

mod dispatcher;
mod orchestrator;
mod producer;
mod recoverer;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{ConsumerDispatcher, DispatchError, DispatcherConfig};
pub use orchestrator::ConsumerOrchestrator;
pub use producer::EventProducer;
pub use recoverer::{DeadLetterRecoverer, RecoveryError, Resolution, RetryPolicy};
