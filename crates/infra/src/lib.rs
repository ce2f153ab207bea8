//! Infrastructure layer: stock stores, the movement engine, document
//! lifecycle, low-stock notification and configuration.

pub mod config;
pub mod documents;
pub mod movement_engine;
pub mod notify;
pub mod store;


pub use config::{StockConfig, connect_store};
pub use documents::{DocumentService, NewDocument};
pub use movement_engine::{
    EngineConfig, ErrorCategory, MovementEngine, MovementError, MovementOutcome,
};
pub use notify::{BusNotifier, LoggingNotifier, LowStockSignal, Notifier, NotifyError};
pub use store::{
    InMemoryStockStore, PostgresStockStore, RecordedOperation, StockStore, StockTransaction,
    StoreError,
};
