//! Storage layer: the settlement store trait and its DuckDB implementation.

mod error;
mod store;
pub use error::StoreError;
pub use store::SettlementStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;
