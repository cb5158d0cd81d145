//! Product events published by the ingress and consumed by the notification side.

mod events;

pub use events::{CreateProduct, ProductCreatedEvent, PRODUCT_CREATED_V1};
