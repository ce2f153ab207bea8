//! Transactional stock storage boundary.
//!
//! A [`StockStore`] hands out [`StockTransaction`]s. Everything a movement
//! operation touches (document, snapshots, ledger, idempotency record) goes
//! through one transaction, which either commits in full or is discarded.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{RecordedOperation, StockStore, StockTransaction, StoreError};
