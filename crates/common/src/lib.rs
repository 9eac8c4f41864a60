//! Shared types for the order engine.

mod types;
mod version;

pub use types::OrderId;
pub use version::Version;
