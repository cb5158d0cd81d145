//! Application layer - Producer, consumer pipeline and product ingress.
//!
//! This layer coordinates the ports; it holds no I/O of its own.

pub mod pipeline;
pub mod product;

pub use pipeline::{
    ConsumerDispatcher, ConsumerOrchestrator, DeadLetterRecoverer, DispatchError,
    DispatcherConfig, EventProducer, RecoveryError, Resolution, RetryPolicy,
};
pub use product::{CreateProductError, ProductService};
