//! Orchestration layer for the order lifecycle.
//!
//! [`OrderService`] coordinates the order repository, stock ledger,
//! refund ledger, and product catalog behind a single API. Each intent
//! validates against the aggregate's state machine and persists with
//! optimistic concurrency; stock effects are idempotent per order so
//! retries and compensations are safe.

pub mod catalog;
pub mod error;
pub mod orders;
pub mod sweep;

pub use catalog::{CachedCatalog, Catalog, InMemoryCatalog, ProductInfo};
pub use error::{Result, ServiceError};
pub use orders::{LineItemRequest, OrderService, PlaceOrderRequest};
pub use sweep::spawn_bank_expiry_sweep;
