use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::Utc;

use stockmaster_core::{
    AggregateRoot, DocumentId, DomainError, ExpectedVersion, LocationId, MovementId, ProductId,
    Quantity, Uom, WarehouseId,
};
use stockmaster_inventory::{
    Document, IdempotencyKey, Location, MovementEntry, NegativeStock, NewMovement, Product,
    SnapshotKey, StockAtLocation, StockSnapshot, Warehouse,
};

use super::r#trait::{RecordedOperation, StockStore, StockTransaction, StoreError};

#[derive(Debug, Clone)]
struct SnapshotRow {
    snapshot: StockSnapshot,
    /// Bumped on every committed write; pins absolute sets.
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, Product>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    locations: HashMap<LocationId, Location>,
    snapshots: BTreeMap<SnapshotKey, SnapshotRow>,
    movements: Vec<MovementEntry>,
    documents: HashMap<DocumentId, Document>,
    operations: HashMap<String, RecordedOperation>,
}

impl State {
    fn live_quantity(&self, key: &SnapshotKey) -> Option<Quantity> {
        self.snapshots.get(key).map(|r| r.snapshot.quantity)
    }

    fn is_referenced_by_ledger(&self, product_id: ProductId) -> bool {
        self.movements.iter().any(|m| m.product_id == product_id)
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. Transactions stage their changes privately and
/// apply them under a single write lock on commit: deltas are re-checked
/// against the live quantity, absolute sets and document saves are checked
/// optimistically.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction::new(self.state.clone())))
    }

    async fn get_quantity(&self, key: SnapshotKey) -> Result<Quantity, StoreError> {
        Ok(self.read()?.live_quantity(&key).unwrap_or(Quantity::ZERO))
    }

    async fn warehouse_total(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Quantity, StoreError> {
        let state = self.read()?;
        Ok(state
            .snapshots
            .values()
            .filter(|r| r.snapshot.product_id == product_id && r.snapshot.warehouse_id == warehouse_id)
            .map(|r| r.snapshot.quantity)
            .sum())
    }

    async fn stock_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        let state = self.read()?;
        let mut rows: Vec<StockSnapshot> = state
            .snapshots
            .values()
            .filter(|r| r.snapshot.product_id == product_id)
            .map(|r| r.snapshot.clone())
            .collect();
        rows.sort_by_key(|s| (s.warehouse_id, s.location_id));
        Ok(rows)
    }

    async fn list_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<MovementEntry>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<MovementEntry>, StoreError> {
        let state = self.read()?;
        Ok(state.movements.iter().rev().take(limit).cloned().collect())
    }

    async fn list_by_reference(&self, reference: &str) -> Result<Vec<MovementEntry>, StoreError> {
        let state = self.read()?;
        Ok(state
            .movements
            .iter()
            .filter(|m| m.reference == reference)
            .cloned()
            .collect())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        Ok(self.read()?.locations.get(&id).cloned())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = state.products.get(&product.id_typed()) {
            let identity_changed =
                existing.sku() != product.sku() || existing.uom() != product.uom();
            if identity_changed && state.is_referenced_by_ledger(product.id_typed()) {
                return Err(DomainError::invariant(format!(
                    "product {} is referenced by the ledger; only name and threshold may change",
                    product.id_typed()
                ))
                .into());
            }
        }
        state.products.insert(product.id_typed(), product.clone());
        Ok(())
    }

    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.warehouses.insert(warehouse.id, warehouse.clone());
        Ok(())
    }

    async fn upsert_location(&self, location: &Location) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if !state.warehouses.contains_key(&location.warehouse_id) {
            return Err(DomainError::not_found(format!(
                "warehouse {}",
                location.warehouse_id
            ))
            .into());
        }
        state.locations.insert(location.id, location.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Base {
    /// Apply the staged delta on top of whatever is live at commit.
    Live,
    /// Replace the live value; `pinned` is the row version observed at read
    /// time (`None` when the row did not exist).
    Absolute {
        quantity: Quantity,
        pinned: Option<u64>,
    },
}

#[derive(Debug, Clone)]
struct StagedRow {
    warehouse_id: WarehouseId,
    uom: Uom,
    base: Base,
    delta: Quantity,
    negative: NegativeStock,
}

#[derive(Debug, Clone)]
enum StagedDocument {
    Insert(Document),
    Save {
        document: Document,
        expected: ExpectedVersion,
    },
    Delete {
        expected: ExpectedVersion,
    },
}

struct InMemoryTransaction {
    state: Arc<RwLock<State>>,
    rows: BTreeMap<SnapshotKey, StagedRow>,
    movements: Vec<MovementEntry>,
    documents: HashMap<DocumentId, StagedDocument>,
    operations: Vec<(String, RecordedOperation)>,
}

impl InMemoryTransaction {
    fn new(state: Arc<RwLock<State>>) -> Self {
        Self {
            state,
            rows: BTreeMap::new(),
            movements: Vec::new(),
            documents: HashMap::new(),
            operations: Vec::new(),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    /// Quantity as this transaction sees it, with the live row version.
    fn visible(&self, key: &SnapshotKey) -> Result<(Option<Quantity>, Option<u64>), StoreError> {
        let state = self.read()?;
        let live = state.snapshots.get(key);
        let live_qty = live.map(|r| r.snapshot.quantity);
        let live_version = live.map(|r| r.version);
        let visible = match self.rows.get(key) {
            None => live_qty,
            Some(staged) => Some(match staged.base {
                Base::Live => live_qty.unwrap_or(Quantity::ZERO).checked_add(staged.delta)?,
                Base::Absolute { quantity, .. } => quantity.checked_add(staged.delta)?,
            }),
        };
        Ok((visible, live_version))
    }
}

#[async_trait::async_trait]
impl StockTransaction for InMemoryTransaction {
    async fn load_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        match self.documents.get(&id) {
            Some(StagedDocument::Insert(document))
            | Some(StagedDocument::Save { document, .. }) => Ok(Some(document.clone())),
            Some(StagedDocument::Delete { .. }) => Ok(None),
            None => Ok(self.read()?.documents.get(&id).cloned()),
        }
    }

    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn load_location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError> {
        Ok(self.read()?.locations.get(&id).cloned())
    }

    async fn load_warehouse(&mut self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        Ok(self.read()?.warehouses.get(&id).cloned())
    }

    async fn get_quantity(&mut self, key: SnapshotKey) -> Result<Option<Quantity>, StoreError> {
        Ok(self.visible(&key)?.0)
    }

    async fn locations_with_stock(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockAtLocation>, StoreError> {
        let mut keys: Vec<SnapshotKey> = {
            let state = self.read()?;
            state
                .snapshots
                .values()
                .filter(|r| {
                    r.snapshot.product_id == product_id && r.snapshot.warehouse_id == warehouse_id
                })
                .map(|r| r.snapshot.key())
                .collect()
        };
        keys.extend(
            self.rows
                .iter()
                .filter(|(k, r)| k.product_id == product_id && r.warehouse_id == warehouse_id)
                .map(|(k, _)| *k),
        );
        keys.sort();
        keys.dedup();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let (Some(quantity), _) = self.visible(&key)? {
                if quantity.is_positive() {
                    out.push(StockAtLocation::new(key.location_id, quantity));
                }
            }
        }
        Ok(out)
    }

    async fn apply_delta(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        delta: Quantity,
        uom: &Uom,
        negative: NegativeStock,
    ) -> Result<Quantity, StoreError> {
        let now = Utc::now();
        let mut projected = StockSnapshot::empty(key, warehouse_id, uom.clone(), now);
        projected.quantity = self.visible(&key)?.0.unwrap_or(Quantity::ZERO);
        let next = projected.apply_delta(delta, negative, now)?;

        let staged = self.rows.entry(key).or_insert_with(|| StagedRow {
            warehouse_id,
            uom: uom.clone(),
            base: Base::Live,
            delta: Quantity::ZERO,
            negative,
        });
        staged.delta = staged.delta.checked_add(delta)?;
        if negative == NegativeStock::Reject {
            staged.negative = NegativeStock::Reject;
        }
        Ok(next)
    }

    async fn set_quantity(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        quantity: Quantity,
        uom: &Uom,
    ) -> Result<Quantity, StoreError> {
        let (visible, live_version) = self.visible(&key)?;
        let previous = visible.unwrap_or(Quantity::ZERO);
        let pinned = match self.rows.get(&key).map(|r| r.base) {
            Some(Base::Absolute { pinned, .. }) => pinned,
            _ => live_version,
        };
        let negative = self
            .rows
            .get(&key)
            .map(|r| r.negative)
            .unwrap_or_default();
        self.rows.insert(
            key,
            StagedRow {
                warehouse_id,
                uom: uom.clone(),
                base: Base::Absolute { quantity, pinned },
                delta: Quantity::ZERO,
                negative,
            },
        );
        Ok(previous)
    }

    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError> {
        let entry = movement.commit(MovementId::new(), Utc::now());
        self.movements.push(entry.clone());
        Ok(entry)
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let exists = self.documents.contains_key(&document.id_typed())
            || self.read()?.documents.contains_key(&document.id_typed());
        if exists {
            return Err(StoreError::Conflict(format!(
                "document {} already exists",
                document.id_typed()
            )));
        }
        self.documents
            .insert(document.id_typed(), StagedDocument::Insert(document.clone()));
        Ok(())
    }

    async fn save_document(&mut self, document: &mut Document) -> Result<(), StoreError> {
        let id = document.id_typed();
        let staged = match self.documents.remove(&id) {
            Some(StagedDocument::Insert(_)) => {
                document.bump_version();
                StagedDocument::Insert(document.clone())
            }
            Some(StagedDocument::Save { expected, .. }) => {
                document.bump_version();
                StagedDocument::Save {
                    document: document.clone(),
                    expected,
                }
            }
            Some(deleted @ StagedDocument::Delete { .. }) => {
                self.documents.insert(id, deleted);
                return Err(DomainError::not_found(format!("document {id}")).into());
            }
            None => {
                let expected = ExpectedVersion::of(&*document);
                document.bump_version();
                StagedDocument::Save {
                    document: document.clone(),
                    expected,
                }
            }
        };
        self.documents.insert(id, staged);
        Ok(())
    }

    async fn delete_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let id = document.id_typed();
        match self.documents.remove(&id) {
            // Never committed: nothing to delete.
            Some(StagedDocument::Insert(_)) => {}
            Some(StagedDocument::Save { expected, .. }) => {
                self.documents.insert(id, StagedDocument::Delete { expected });
            }
            Some(StagedDocument::Delete { .. }) | None => {
                self.documents.insert(
                    id,
                    StagedDocument::Delete {
                        expected: ExpectedVersion::of(document),
                    },
                );
            }
        }
        Ok(())
    }

    async fn find_operation(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<RecordedOperation>, StoreError> {
        if let Some((_, op)) = self.operations.iter().find(|(k, _)| k == key.as_str()) {
            return Ok(Some(op.clone()));
        }
        Ok(self.read()?.operations.get(key.as_str()).cloned())
    }

    async fn record_operation(
        &mut self,
        key: &IdempotencyKey,
        operation: RecordedOperation,
    ) -> Result<(), StoreError> {
        self.operations.push((key.as_str().to_string(), operation));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.state.write().map_err(|_| StoreError::Poisoned)?;

        // Validate everything before touching shared state.
        let now = Utc::now();
        let mut next_rows = Vec::with_capacity(this.rows.len());
        for (key, row) in &this.rows {
            let live = state.snapshots.get(key);
            let mut snapshot = match live {
                Some(r) => r.snapshot.clone(),
                None => StockSnapshot::empty(*key, row.warehouse_id, row.uom.clone(), now),
            };
            match row.base {
                Base::Absolute { quantity, pinned } => {
                    if live.map(|r| r.version) != pinned {
                        return Err(StoreError::Conflict(format!(
                            "stock of product {} at location {} changed during the count",
                            key.product_id, key.location_id
                        )));
                    }
                    snapshot.quantity = quantity;
                }
                Base::Live => {}
            }
            snapshot.apply_delta(row.delta, row.negative, now)?;
            next_rows.push((*key, snapshot));
        }
        for (id, staged) in &this.documents {
            match staged {
                StagedDocument::Insert(document) => {
                    let clash = state.documents.contains_key(id)
                        || state
                            .documents
                            .values()
                            .any(|d| d.reference() == document.reference());
                    if clash {
                        return Err(StoreError::Conflict(format!(
                            "document reference '{}' already exists",
                            document.reference()
                        )));
                    }
                }
                StagedDocument::Save { expected, .. } | StagedDocument::Delete { expected } => {
                    match state.documents.get(id) {
                        Some(live) => expected.check(live.version()).map_err(|e| {
                            StoreError::Conflict(format!(
                                "document {} was modified concurrently: {e}",
                                live.reference()
                            ))
                        })?,
                        None => {
                            return Err(StoreError::Conflict(format!(
                                "document {id} was deleted concurrently"
                            )));
                        }
                    }
                }
            }
        }
        for (key, _) in &this.operations {
            if state.operations.contains_key(key) {
                return Err(StoreError::Conflict(format!(
                    "idempotency key '{key}' was used concurrently"
                )));
            }
        }

        for (key, snapshot) in next_rows {
            let live = state.snapshots.entry(key).or_insert_with(|| SnapshotRow {
                snapshot: snapshot.clone(),
                version: 0,
            });
            live.snapshot = snapshot;
            live.version += 1;
        }
        for (id, staged) in this.documents {
            match staged {
                StagedDocument::Insert(document) | StagedDocument::Save { document, .. } => {
                    state.documents.insert(id, document);
                }
                StagedDocument::Delete { .. } => {
                    state.documents.remove(&id);
                }
            }
        }
        state.movements.extend(this.movements);
        state.operations.extend(this.operations);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockmaster_inventory::{DocumentTarget, MovementOperation};

    fn key() -> SnapshotKey {
        SnapshotKey::new(ProductId::new(), LocationId::new())
    }

    fn qty(n: i64) -> Quantity {
        Quantity::from_i64(n)
    }

    async fn seed(store: &InMemoryStockStore, key: SnapshotKey, wh: WarehouseId, n: i64) {
        let mut tx = store.begin().await.unwrap();
        tx.apply_delta(key, wh, qty(n), &Uom::pieces(), NegativeStock::Reject)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryStockStore::new();
        let k = key();
        {
            let mut tx = store.begin().await.unwrap();
            tx.apply_delta(k, WarehouseId::new(), qty(5), &Uom::pieces(), NegativeStock::Reject)
                .await
                .unwrap();
            assert_eq!(tx.get_quantity(k).await.unwrap(), Some(qty(5)));
        }
        assert_eq!(store.get_quantity(k).await.unwrap(), Quantity::ZERO);
        assert!(store.stock_by_product(k.product_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_decrements_are_rechecked_at_commit() {
        let store = InMemoryStockStore::new();
        let (k, wh) = (key(), WarehouseId::new());
        seed(&store, k, wh, 50).await;

        let mut a = store.begin().await.unwrap();
        let mut b = store.begin().await.unwrap();
        a.apply_delta(k, wh, qty(-30), &Uom::pieces(), NegativeStock::Reject)
            .await
            .unwrap();
        b.apply_delta(k, wh, qty(-30), &Uom::pieces(), NegativeStock::Reject)
            .await
            .unwrap();
        a.commit().await.unwrap();

        match b.commit().await {
            Err(StoreError::Domain(DomainError::InsufficientStock { available, .. })) => {
                assert_eq!(available, qty(20));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(store.get_quantity(k).await.unwrap(), qty(20));
    }

    #[tokio::test]
    async fn overflowing_delta_is_an_error() {
        let store = InMemoryStockStore::new();
        let (k, wh) = (key(), WarehouseId::new());
        let top = Quantity::new(rust_decimal::Decimal::MAX);
        {
            let mut tx = store.begin().await.unwrap();
            tx.apply_delta(k, wh, top, &Uom::pieces(), NegativeStock::Reject)
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .apply_delta(k, wh, qty(1), &Uom::pieces(), NegativeStock::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
        drop(tx);
        assert_eq!(store.get_quantity(k).await.unwrap(), top);
    }

    #[tokio::test]
    async fn absolute_set_conflicts_with_interleaved_write() {
        let store = InMemoryStockStore::new();
        let (k, wh) = (key(), WarehouseId::new());
        seed(&store, k, wh, 10).await;

        let mut count = store.begin().await.unwrap();
        let previous = count.set_quantity(k, wh, qty(8), &Uom::pieces()).await.unwrap();
        assert_eq!(previous, qty(10));

        seed(&store, k, wh, 1).await;

        assert!(matches!(count.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.get_quantity(k).await.unwrap(), qty(11));
    }

    #[tokio::test]
    async fn stale_document_save_is_a_conflict() {
        let store = InMemoryStockStore::new();
        let doc = Document::draft(
            DocumentId::new(),
            None,
            DocumentTarget::Adjustment {
                warehouse_id: WarehouseId::new(),
                location_id: LocationId::new(),
            },
            None,
            Utc::now(),
        )
        .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_document(&doc).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.load_document(doc.id_typed()).await.unwrap().unwrap();
        let mut b = second.load_document(doc.id_typed()).await.unwrap().unwrap();
        first.save_document(&mut a).await.unwrap();
        second.save_document(&mut b).await.unwrap();
        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(StoreError::Conflict(_))));

        let stored = store.get_document(doc.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test]
    async fn operations_are_visible_inside_their_transaction() {
        let store = InMemoryStockStore::new();
        let key = IdempotencyKey::new("op-1").unwrap();
        let recorded = RecordedOperation {
            document_id: DocumentId::new(),
            operation: MovementOperation::PostAdjustment,
        };
        let mut tx = store.begin().await.unwrap();
        tx.record_operation(&key, recorded.clone()).await.unwrap();
        assert_eq!(tx.find_operation(&key).await.unwrap(), Some(recorded.clone()));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.find_operation(&key).await.unwrap(), Some(recorded));
    }

    #[tokio::test]
    async fn product_identity_is_frozen_once_in_the_ledger() {
        let store = InMemoryStockStore::new();
        let product = Product::new(ProductId::new(), "SKU-1", "Widget", Uom::pieces()).unwrap();
        store.upsert_product(&product).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.append_movement(
            NewMovement::receipt("REC-1", product.id_typed(), LocationId::new(), qty(1), Uom::pieces())
                .unwrap(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut renamed = product.clone();
        renamed.rename("Widget v2").unwrap();
        store.upsert_product(&renamed).await.unwrap();

        let resku = Product::new(product.id_typed(), "SKU-2", "Widget", Uom::pieces()).unwrap();
        match store.upsert_product(&resku).await {
            Err(StoreError::Domain(DomainError::InvariantViolation(msg))) => {
                assert!(msg.contains("only name and threshold"));
            }
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }
}
