//! Product Event Pipeline - At-least-once event consumption with idempotent side effects.
//!
//! Products are published as `ProductCreatedEvent`s to a partitioned topic.
//! Consumers look each message id up in an idempotency ledger, perform one
//! outbound call, record the message, and hand failures to a retry /
//! dead-letter recoverer.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
