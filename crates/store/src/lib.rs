//! Persistence layer for the order lifecycle engine.
//!
//! Three storage seams, each with an in-memory and a PostgreSQL
//! implementation:
//! - [`OrderRepository`]: order aggregates with optimistic concurrency
//! - [`StockLedger`]: atomic, idempotent stock reservations
//! - [`RefundLedger`]: append-oriented refund records

mod error;
mod memory;
mod postgres;
mod repository;

pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderRepository, InMemoryRefundLedger, InMemoryStockLedger};
pub use postgres::{
    PostgresOrderRepository, PostgresRefundLedger, PostgresStockLedger, run_migrations,
};
pub use repository::{OrderRepository, RefundLedger, StockLedger};
