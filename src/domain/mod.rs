//! Domain layer containing pipeline rules and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (message ids, timestamps, envelope, errors)
//! - `pipeline` - Processing outcomes, ledger records, failure classification
//! - `product` - Product creation request and event

pub mod foundation;
pub mod pipeline;
pub mod product;
