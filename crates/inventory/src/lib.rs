//! Inventory domain module: catalog, stock snapshots, the movement ledger and
//! stock documents.
//!
//! This crate contains business rules only, implemented as deterministic
//! domain logic (no IO, no storage, no async). The transactional application
//! of documents to stock lives in `stockmaster-infra`.

pub mod catalog;
pub mod document;
pub mod low_stock;
pub mod movement;
pub mod picking;
pub mod request;
pub mod snapshot;
pub mod transfer;

pub use catalog::{Location, Product, Warehouse};
pub use document::{
    Document, DocumentHeader, DocumentKind, DocumentLine, DocumentStatus, DocumentTarget,
    MovementOperation, NewLine,
};
pub use low_stock::LowStockAlert;
pub use movement::{MovementEntry, MovementStatus, MovementType, NewMovement};
pub use picking::{StockAtLocation, choose_pick_location, pick_location};
pub use request::{
    CountLine, IdempotencyKey, MovementRequest, PickLine, ReceiveLine, RequestLine, TransferLine,
};
pub use snapshot::{NegativeStock, SnapshotKey, StockSnapshot};
pub use transfer::{TransferPlan, TransferVariancePolicy};
