//! Product ingress.

mod create_product;

pub use create_product::{CreateProductError, ProductService};
