//! ProductService - Accepts product creation requests and publishes them.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::application::pipeline::EventProducer;
use crate::domain::foundation::ValidationError;
use crate::domain::product::CreateProduct;
use crate::ports::PublishError;

/// Why a product could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateProductError {
    #[error("Invalid product: {0}")]
    Invalid(#[from] ValidationError),

    /// The creation event was not acknowledged by the broker.
    #[error("Product creation failed: {0}")]
    PublishFailed(#[from] PublishError),
}

/// Creates products by publishing `ProductCreatedEvent`s.
pub struct ProductService {
    producer: Arc<EventProducer>,
}

impl ProductService {
    pub fn new(producer: Arc<EventProducer>) -> Self {
        Self { producer }
    }

    /// Validates the request, assigns a product id and publishes the event.
    ///
    /// Returns the new product id once the broker acknowledged the event.
    pub async fn create_product(&self, request: CreateProduct) -> Result<String, CreateProductError> {
        request.validate()?;

        let product_id = Uuid::new_v4().to_string();
        let event = request.into_event(product_id.clone());

        self.producer.publish(&event, &product_id).await?;

        tracing::info!(product_id = %product_id, "Product created");
        Ok(product_id)
    }
}
