use std::sync::Arc;

use thiserror::Error;

use stockmaster_core::{
    DocumentId, DomainError, LocationId, ProductId, Quantity, Uom, WarehouseId,
};
use stockmaster_inventory::{
    Document, IdempotencyKey, Location, MovementEntry, MovementOperation, NegativeStock,
    NewMovement, Product, SnapshotKey, StockAtLocation, StockSnapshot, Warehouse,
};

/// Stock storage error.
///
/// Deterministic business failures raised while applying a change inside a
/// transaction (e.g. a decrement that would go negative) travel as `Domain`;
/// the remaining variants are infrastructure failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A concurrent writer won an optimistic check (document version,
    /// absolute snapshot set, idempotency key).
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Idempotency record written alongside a committed movement operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOperation {
    pub document_id: DocumentId,
    pub operation: MovementOperation,
}

/// Transactional stock store.
///
/// Reads on the store itself observe committed state only.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError>;

    /// Committed quantity of a single (product, location) pair; zero if no row.
    async fn get_quantity(&self, key: SnapshotKey) -> Result<Quantity, StoreError>;

    /// Sum of a product's snapshots over every location of a warehouse.
    async fn warehouse_total(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Quantity, StoreError>;

    /// Every snapshot row of a product across warehouses and locations.
    async fn stock_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError>;

    /// Ledger entries for a product, oldest first.
    async fn list_by_product(&self, product_id: ProductId)
    -> Result<Vec<MovementEntry>, StoreError>;

    /// The `limit` most recent ledger entries, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<MovementEntry>, StoreError>;

    /// Ledger entries written under a document reference, oldest first.
    async fn list_by_reference(&self, reference: &str) -> Result<Vec<MovementEntry>, StoreError>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, StoreError>;

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError>;

    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError>;

    async fn upsert_location(&self, location: &Location) -> Result<(), StoreError>;
}

/// One atomic unit of work.
///
/// Dropping a transaction without calling [`StockTransaction::commit`] rolls
/// every staged change back.
#[async_trait::async_trait]
pub trait StockTransaction: Send {
    /// Load a document for update.
    async fn load_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError>;

    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError>;

    async fn load_location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError>;

    async fn load_warehouse(&mut self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError>;

    /// Quantity as seen by this transaction; `None` if no row exists.
    async fn get_quantity(&mut self, key: SnapshotKey) -> Result<Option<Quantity>, StoreError>;

    /// Locations of `warehouse_id` holding a positive quantity of `product_id`.
    async fn locations_with_stock(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockAtLocation>, StoreError>;

    /// Atomic increment/decrement, creating the row on first touch.
    ///
    /// Returns the new quantity. A result below zero fails with
    /// `DomainError::InsufficientStock` unless `negative` is `Allow`.
    async fn apply_delta(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        delta: Quantity,
        uom: &Uom,
        negative: NegativeStock,
    ) -> Result<Quantity, StoreError>;

    /// Absolute set used by physical counts. Returns the quantity it replaced
    /// (zero when the row did not exist).
    async fn set_quantity(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        quantity: Quantity,
        uom: &Uom,
    ) -> Result<Quantity, StoreError>;

    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError>;

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError>;

    /// Persist `document` if nobody saved it since it was loaded, then bump its
    /// version.
    async fn save_document(&mut self, document: &mut Document) -> Result<(), StoreError>;

    async fn delete_document(&mut self, document: &Document) -> Result<(), StoreError>;

    async fn find_operation(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<RecordedOperation>, StoreError>;

    async fn record_operation(
        &mut self,
        key: &IdempotencyKey,
        operation: RecordedOperation,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn get_quantity(&self, key: SnapshotKey) -> Result<Quantity, StoreError> {
        (**self).get_quantity(key).await
    }

    async fn warehouse_total(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Quantity, StoreError> {
        (**self).warehouse_total(product_id, warehouse_id).await
    }

    async fn stock_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        (**self).stock_by_product(product_id).await
    }

    async fn list_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).list_by_product(product_id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).list_recent(limit).await
    }

    async fn list_by_reference(&self, reference: &str) -> Result<Vec<MovementEntry>, StoreError> {
        (**self).list_by_reference(reference).await
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        (**self).get_document(id).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        (**self).get_product(id).await
    }

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        (**self).get_location(id).await
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        (**self).upsert_product(product).await
    }

    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        (**self).upsert_warehouse(warehouse).await
    }

    async fn upsert_location(&self, location: &Location) -> Result<(), StoreError> {
        (**self).upsert_location(location).await
    }
}
