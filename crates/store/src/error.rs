use thiserror::Error;

use common::{OrderId, Version};
use domain::{ProductId, RefundId};

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order changed under us: the expected version did not match the
    /// stored version. Callers reload and retry.
    #[error("version conflict for order {order_id}: expected {expected}, found {actual}")]
    VersionConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// The order does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The refund record does not exist.
    #[error("refund not found: {0}")]
    RefundNotFound(RefundId),

    /// The product has no stock row.
    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    /// Not enough stock to cover a reservation line. The reservation as a
    /// whole is rolled back; no line is partially held.
    #[error("insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
