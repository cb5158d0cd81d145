//! Side-effect invoker adapters.
//!
//! - `HttpInvoker` - POSTs the envelope to a collaborator over HTTP

mod http_invoker;

pub use http_invoker::{HttpInvoker, HttpInvokerConfig};
