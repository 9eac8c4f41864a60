//! Service error types.

use thiserror::Error;

use common::OrderId;
use domain::{OrderError, ProductId, RefundId};
use store::StoreError;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The order's state machine refused the intent.
    #[error(transparent)]
    Rejected(#[from] OrderError),

    /// Order not found.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Refund record not found.
    #[error("refund not found: {0}")]
    RefundNotFound(RefundId),

    /// The product is not in the catalog or stock ledger.
    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    /// Not enough stock to cover the order.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Concurrent writers kept winning; the retry budget ran out.
    #[error("order {0} is contended, retries exhausted")]
    Contention(OrderId),

    /// A storage error occurred.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(id) => ServiceError::OrderNotFound(id),
            StoreError::RefundNotFound(id) => ServiceError::RefundNotFound(id),
            StoreError::UnknownProduct(product_id) => ServiceError::UnknownProduct(product_id),
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => ServiceError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => ServiceError::Store(other),
        }
    }
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
