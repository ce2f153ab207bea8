//! Postgres-backed stock store.
//!
//! Every movement operation runs inside one `sqlx` transaction. Snapshot
//! mutations are single-statement atomic upserts (`quantity = quantity + $delta`)
//! or run under a `FOR UPDATE` row lock, so concurrent operations on the same
//! (product, location) pair serialize on the row while disjoint pairs proceed
//! independently. Absolute sets insert a zero row first so there is always a
//! row to lock, even for a pair nobody has stocked yet.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure / deadlock) | `40001` / `40P01` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Domain(ReferenceNotFound)` |
//! | Database (other) | Any other | `Database` |
//! | PoolClosed / other | N/A | `Database` |

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use stockmaster_core::{
    AggregateRoot, DocumentId, DomainError, LocationId, MovementId, ProductId, Quantity, Uom,
    UserId, WarehouseId,
};
use stockmaster_inventory::{
    Document, DocumentHeader, DocumentLine, DocumentTarget, IdempotencyKey, Location,
    MovementEntry, MovementStatus, NegativeStock, NewMovement, Product, SnapshotKey,
    StockAtLocation, StockSnapshot, Warehouse,
};

use super::r#trait::{RecordedOperation, StockStore, StockTransaction, StoreError};

/// Advisory lock key held while the schema is applied.
const MIGRATION_LOCK: i64 = 0x5354_4f43_4b4d;

/// Schema bootstrap, applied statement by statement by [`PostgresStockStore::migrate`].
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id                UUID PRIMARY KEY,
        sku               TEXT NOT NULL UNIQUE,
        name              TEXT NOT NULL,
        uom               TEXT NOT NULL,
        reorder_threshold NUMERIC NULL CHECK (reorder_threshold >= 0)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warehouses (
        id   UUID PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        id           UUID PRIMARY KEY,
        warehouse_id UUID NOT NULL REFERENCES warehouses (id),
        name         TEXT NOT NULL,
        capacity     NUMERIC NULL,
        uom          TEXT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_snapshots (
        product_id   UUID NOT NULL REFERENCES products (id),
        location_id  UUID NOT NULL REFERENCES locations (id),
        warehouse_id UUID NOT NULL REFERENCES warehouses (id),
        quantity     NUMERIC NOT NULL DEFAULT 0,
        uom          TEXT NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (product_id, location_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS stock_snapshots_product_warehouse
        ON stock_snapshots (product_id, warehouse_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movement_entries (
        seq              BIGSERIAL UNIQUE,
        id               UUID PRIMARY KEY,
        movement_type    TEXT NOT NULL
            CHECK (movement_type IN ('receipt', 'delivery', 'internal', 'adjustment')),
        reference        TEXT NOT NULL,
        product_id       UUID NOT NULL REFERENCES products (id),
        from_location_id UUID NULL REFERENCES locations (id),
        to_location_id   UUID NULL REFERENCES locations (id),
        quantity         NUMERIC NOT NULL CHECK (quantity > 0),
        uom              TEXT NOT NULL,
        status           TEXT NOT NULL DEFAULT 'done',
        created_by       UUID NULL,
        created_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movement_entries_product ON movement_entries (product_id, seq)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS movement_entries_reference ON movement_entries (reference, seq)
    "#,
    r#"
    CREATE OR REPLACE FUNCTION movement_entries_append_only() RETURNS trigger AS $$
    BEGIN
        RAISE EXCEPTION 'movement_entries is append-only';
    END;
    $$ LANGUAGE plpgsql
    "#,
    r#"
    DROP TRIGGER IF EXISTS movement_entries_no_rewrite ON movement_entries
    "#,
    r#"
    CREATE TRIGGER movement_entries_no_rewrite
        BEFORE UPDATE OR DELETE ON movement_entries
        FOR EACH ROW EXECUTE FUNCTION movement_entries_append_only()
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id         UUID PRIMARY KEY,
        reference  TEXT NOT NULL UNIQUE,
        kind       TEXT NOT NULL,
        status     TEXT NOT NULL,
        target     JSONB NOT NULL,
        created_by UUID NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        version    BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_lines (
        document_id UUID NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
        line_no     INTEGER NOT NULL,
        product_id  UUID NOT NULL REFERENCES products (id),
        requested   NUMERIC NOT NULL,
        applied     NUMERIC NOT NULL,
        uom         TEXT NOT NULL,
        recorded    NUMERIC NULL,
        reason      TEXT NULL,
        PRIMARY KEY (document_id, line_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movement_operations (
        idempotency_key TEXT PRIMARY KEY,
        document_id     UUID NOT NULL,
        operation       TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Postgres-backed stock store.
///
/// Uses the SQLx connection pool, which is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, indexes and the append-only guard on the ledger.
    /// Idempotent; concurrent callers serialize on an advisory lock.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(MIGRATION_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("migration_lock", e))?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        debug!(statements = SCHEMA.len(), "stock schema applied");
        Ok(())
    }
}

#[async_trait::async_trait]
impl StockStore for PostgresStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_quantity(&self, key: SnapshotKey) -> Result<Quantity, StoreError> {
        let row = sqlx::query(
            "SELECT quantity FROM stock_snapshots WHERE product_id = $1 AND location_id = $2",
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_quantity", e))?;

        match row {
            Some(row) => quantity_column(&row, "quantity"),
            None => Ok(Quantity::ZERO),
        }
    }

    #[instrument(skip(self), fields(product_id = %product_id, warehouse_id = %warehouse_id), err)]
    async fn warehouse_total(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Quantity, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0) AS total
            FROM stock_snapshots
            WHERE product_id = $1 AND warehouse_id = $2
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("warehouse_total", e))?;

        quantity_column(&row, "total")
    }

    async fn stock_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<StockSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, warehouse_id, location_id, quantity, uom, updated_at
            FROM stock_snapshots
            WHERE product_id = $1
            ORDER BY warehouse_id, location_id
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stock_by_product", e))?;

        rows.iter().map(snapshot_from_row).collect()
    }

    async fn list_by_product(
        &self,
        product_id: ProductId,
    ) -> Result<Vec<MovementEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{MOVEMENT_COLUMNS} WHERE product_id = $1 ORDER BY seq ASC"
        ))
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_product", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<MovementEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!("{MOVEMENT_COLUMNS} ORDER BY seq DESC LIMIT $1"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_recent", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn list_by_reference(&self, reference: &str) -> Result<Vec<MovementEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "{MOVEMENT_COLUMNS} WHERE reference = $1 ORDER BY seq ASC"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_reference", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_document(&mut conn, id, false).await
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            "SELECT id, sku, name, uom, reorder_threshold FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_location(&self, id: LocationId) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query(
            "SELECT id, warehouse_id, name, capacity, uom FROM locations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_location", e))?;

        row.as_ref().map(location_from_row).transpose()
    }

    #[instrument(skip(self, product), fields(product_id = %product.id_typed(), sku = product.sku()), err)]
    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let existing = sqlx::query(
            r#"
            SELECT
                p.sku,
                p.uom,
                EXISTS (SELECT 1 FROM movement_entries m WHERE m.product_id = p.id) AS referenced
            FROM products p
            WHERE p.id = $1
            FOR UPDATE
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_product_identity", e))?;

        if let Some(row) = existing {
            let sku: String = column(&row, "sku")?;
            let uom: String = column(&row, "uom")?;
            let referenced: bool = column(&row, "referenced")?;
            let identity_changed = sku != product.sku() || uom != product.uom().as_str();
            if identity_changed && referenced {
                return Err(DomainError::invariant(format!(
                    "product {} is referenced by the ledger; only name and threshold may change",
                    product.id_typed()
                ))
                .into());
            }
        }

        sqlx::query(
            r#"
            INSERT INTO products (id, sku, name, uom, reorder_threshold)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                uom = EXCLUDED.uom,
                reorder_threshold = EXCLUDED.reorder_threshold
            "#,
        )
        .bind(product.id_typed().as_uuid())
        .bind(product.sku())
        .bind(product.name())
        .bind(product.uom().as_str())
        .bind(product.reorder_threshold().map(|q| q.value()))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET code = EXCLUDED.code, name = EXCLUDED.name
            "#,
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.code)
        .bind(&warehouse.name)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_warehouse", e))?;
        Ok(())
    }

    async fn upsert_location(&self, location: &Location) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO locations (id, warehouse_id, name, capacity, uom)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                warehouse_id = EXCLUDED.warehouse_id,
                name = EXCLUDED.name,
                capacity = EXCLUDED.capacity,
                uom = EXCLUDED.uom
            "#,
        )
        .bind(location.id.as_uuid())
        .bind(location.warehouse_id.as_uuid())
        .bind(&location.name)
        .bind(location.capacity.map(|q| q.value()))
        .bind(location.uom.as_ref().map(|u| u.as_str()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_location", e))?;
        Ok(())
    }
}

/// One open Postgres transaction. Dropped without commit, sqlx rolls it back.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl StockTransaction for PostgresTransaction {
    async fn load_document(&mut self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        fetch_document(&mut self.tx, id, true).await
    }

    async fn load_product(&mut self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(
            "SELECT id, sku, name, uom, reorder_threshold FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_product", e))?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn load_location(&mut self, id: LocationId) -> Result<Option<Location>, StoreError> {
        let row = sqlx::query(
            "SELECT id, warehouse_id, name, capacity, uom FROM locations WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_location", e))?;

        row.as_ref().map(location_from_row).transpose()
    }

    async fn load_warehouse(&mut self, id: WarehouseId) -> Result<Option<Warehouse>, StoreError> {
        let row = sqlx::query("SELECT id, code, name FROM warehouses WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_warehouse", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let code: String = column(&row, "code")?;
        let name: String = column(&row, "name")?;
        Warehouse::new(id, code, name)
            .map(Some)
            .map_err(corrupt("warehouses"))
    }

    async fn get_quantity(&mut self, key: SnapshotKey) -> Result<Option<Quantity>, StoreError> {
        let row = sqlx::query(
            "SELECT quantity FROM stock_snapshots WHERE product_id = $1 AND location_id = $2",
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_quantity", e))?;

        row.as_ref()
            .map(|r| quantity_column(r, "quantity"))
            .transpose()
    }

    #[instrument(skip(self), fields(product_id = %product_id, warehouse_id = %warehouse_id), err)]
    async fn locations_with_stock(
        &mut self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Vec<StockAtLocation>, StoreError> {
        // Lock candidate rows so the pick decision and the decrement agree.
        let rows = sqlx::query(
            r#"
            SELECT location_id, quantity
            FROM stock_snapshots
            WHERE product_id = $1 AND warehouse_id = $2 AND quantity > 0
            ORDER BY location_id
            FOR UPDATE
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("locations_with_stock", e))?;

        rows.iter()
            .map(|row| {
                let location: Uuid = column(row, "location_id")?;
                Ok(StockAtLocation::new(
                    LocationId::from_uuid(location),
                    quantity_column(row, "quantity")?,
                ))
            })
            .collect()
    }

    #[instrument(
        skip(self, uom),
        fields(
            product_id = %key.product_id,
            location_id = %key.location_id,
            delta = %delta
        ),
        err
    )]
    async fn apply_delta(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        delta: Quantity,
        uom: &Uom,
        negative: NegativeStock,
    ) -> Result<Quantity, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO stock_snapshots (product_id, location_id, warehouse_id, quantity, uom, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (product_id, location_id)
            DO UPDATE SET
                quantity = stock_snapshots.quantity + EXCLUDED.quantity,
                updated_at = NOW()
            RETURNING quantity
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(delta.value())
        .bind(uom.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("apply_delta", e))?;

        let next = quantity_column(&row, "quantity")?;
        if next.is_negative() && negative == NegativeStock::Reject {
            // The caller drops the transaction, which undoes the upsert.
            return Err(DomainError::insufficient_stock(
                key.product_id,
                Some(key.location_id),
                next - delta,
                -delta,
            )
            .into());
        }
        Ok(next)
    }

    #[instrument(
        skip(self, uom),
        fields(
            product_id = %key.product_id,
            location_id = %key.location_id,
            quantity = %quantity
        ),
        err
    )]
    async fn set_quantity(
        &mut self,
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        quantity: Quantity,
        uom: &Uom,
    ) -> Result<Quantity, StoreError> {
        // The row must exist before it can be locked. A concurrent uncommitted
        // insert of the same key blocks this statement until it resolves.
        sqlx::query(
            r#"
            INSERT INTO stock_snapshots (product_id, location_id, warehouse_id, quantity, uom, updated_at)
            VALUES ($1, $2, $3, 0, $4, NOW())
            ON CONFLICT (product_id, location_id) DO NOTHING
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .bind(uom.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("ensure_snapshot", e))?;

        let row = sqlx::query(
            r#"
            SELECT quantity FROM stock_snapshots
            WHERE product_id = $1 AND location_id = $2
            FOR UPDATE
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_snapshot", e))?;
        let previous = quantity_column(&row, "quantity")?;

        sqlx::query(
            r#"
            UPDATE stock_snapshots
            SET quantity = $3, updated_at = NOW()
            WHERE product_id = $1 AND location_id = $2
            "#,
        )
        .bind(key.product_id.as_uuid())
        .bind(key.location_id.as_uuid())
        .bind(quantity.value())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("set_quantity", e))?;

        Ok(previous)
    }

    async fn append_movement(&mut self, movement: NewMovement) -> Result<MovementEntry, StoreError> {
        let entry = movement.commit(MovementId::new(), Utc::now());
        sqlx::query(
            r#"
            INSERT INTO movement_entries (
                id,
                movement_type,
                reference,
                product_id,
                from_location_id,
                to_location_id,
                quantity,
                uom,
                status,
                created_by,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.movement_type.as_str())
        .bind(&entry.reference)
        .bind(entry.product_id.as_uuid())
        .bind(entry.from_location.map(|l| *l.as_uuid()))
        .bind(entry.to_location.map(|l| *l.as_uuid()))
        .bind(entry.quantity.value())
        .bind(entry.uom.as_str())
        .bind(entry.status.as_str())
        .bind(entry.created_by.map(|u| *u.as_uuid()))
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;

        Ok(entry)
    }

    async fn insert_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let header = document.header();
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, reference, kind, status, target, created_by, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(header.id.as_uuid())
        .bind(&header.reference)
        .bind(header.target.kind().as_str())
        .bind(header.status.as_str())
        .bind(encode_target(&header.target)?)
        .bind(header.created_by.map(|u| *u.as_uuid()))
        .bind(header.created_at)
        .bind(header.updated_at)
        .bind(version_to_db(header.version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;

        insert_lines(&mut self.tx, header.id, document.lines()).await
    }

    #[instrument(
        skip(self, document),
        fields(
            document_id = %document.id_typed(),
            reference = document.reference(),
            expected_version = document.version()
        ),
        err
    )]
    async fn save_document(&mut self, document: &mut Document) -> Result<(), StoreError> {
        let expected = document.version();
        let header = document.header();
        let updated = sqlx::query(
            r#"
            UPDATE documents
            SET status = $3, target = $4, updated_at = $5, version = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(header.id.as_uuid())
        .bind(version_to_db(expected)?)
        .bind(header.status.as_str())
        .bind(encode_target(&header.target)?)
        .bind(header.updated_at)
        .bind(version_to_db(expected + 1)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_document", e))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "document {} was modified concurrently (expected version {expected})",
                header.reference
            )));
        }

        sqlx::query("DELETE FROM document_lines WHERE document_id = $1")
            .bind(header.id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("clear_document_lines", e))?;
        insert_lines(&mut self.tx, header.id, document.lines()).await?;

        document.bump_version();
        Ok(())
    }

    async fn delete_document(&mut self, document: &Document) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM documents WHERE id = $1 AND version = $2")
            .bind(document.id_typed().as_uuid())
            .bind(version_to_db(document.version())?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_document", e))?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "document {} was modified concurrently",
                document.reference()
            )));
        }
        Ok(())
    }

    async fn find_operation(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<RecordedOperation>, StoreError> {
        let row = sqlx::query(
            "SELECT document_id, operation FROM movement_operations WHERE idempotency_key = $1",
        )
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_operation", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let document_id: Uuid = column(&row, "document_id")?;
        let operation: String = column(&row, "operation")?;
        Ok(Some(RecordedOperation {
            document_id: DocumentId::from_uuid(document_id),
            operation: operation.parse().map_err(corrupt("movement_operations.operation"))?,
        }))
    }

    async fn record_operation(
        &mut self,
        key: &IdempotencyKey,
        operation: RecordedOperation,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO movement_operations (idempotency_key, document_id, operation)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(key.as_str())
        .bind(operation.document_id.as_uuid())
        .bind(operation.operation.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("record_operation", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

const MOVEMENT_COLUMNS: &str = r#"
    SELECT
        id,
        movement_type,
        reference,
        product_id,
        from_location_id,
        to_location_id,
        quantity,
        uom,
        created_by,
        created_at
    FROM movement_entries
"#;

async fn fetch_document(
    conn: &mut PgConnection,
    id: DocumentId,
    for_update: bool,
) -> Result<Option<Document>, StoreError> {
    let sql = if for_update {
        r#"
        SELECT id, reference, status, target, created_by, created_at, updated_at, version
        FROM documents WHERE id = $1
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, reference, status, target, created_by, created_at, updated_at, version
        FROM documents WHERE id = $1
        "#
    };
    let row = sqlx::query(sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_document", e))?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = column(&row, "status")?;
    let target: serde_json::Value = column(&row, "target")?;
    let created_by: Option<Uuid> = column(&row, "created_by")?;
    let version: i64 = column(&row, "version")?;
    let header = DocumentHeader {
        id,
        reference: column(&row, "reference")?,
        target: serde_json::from_value::<DocumentTarget>(target)
            .map_err(|e| StoreError::Database(format!("corrupt documents.target: {e}")))?,
        status: status.parse().map_err(corrupt("documents.status"))?,
        created_by: created_by.map(UserId::from_uuid),
        created_at: column(&row, "created_at")?,
        updated_at: column(&row, "updated_at")?,
        version: u64::try_from(version)
            .map_err(|e| StoreError::Database(format!("corrupt documents.version: {e}")))?,
    };

    let line_rows = sqlx::query(
        r#"
        SELECT line_no, product_id, requested, applied, uom, recorded, reason
        FROM document_lines
        WHERE document_id = $1
        ORDER BY line_no
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_document_lines", e))?;

    let mut lines = Vec::with_capacity(line_rows.len());
    for row in &line_rows {
        let line_no: i32 = column(row, "line_no")?;
        let product_id: Uuid = column(row, "product_id")?;
        let recorded: Option<Decimal> = column(row, "recorded")?;
        lines.push(DocumentLine {
            line_no: u32::try_from(line_no)
                .map_err(|e| StoreError::Database(format!("corrupt document_lines.line_no: {e}")))?,
            product_id: ProductId::from_uuid(product_id),
            requested: quantity_column(row, "requested")?,
            applied: quantity_column(row, "applied")?,
            uom: uom_column(row, "uom")?,
            recorded: recorded.map(Quantity::new),
            reason: column(row, "reason")?,
        });
    }

    Ok(Some(Document::restore(header, lines)))
}

async fn insert_lines(
    conn: &mut PgConnection,
    document_id: DocumentId,
    lines: &[DocumentLine],
) -> Result<(), StoreError> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO document_lines (
                document_id, line_no, product_id, requested, applied, uom, recorded, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(document_id.as_uuid())
        .bind(i32::try_from(line.line_no).map_err(|e| {
            StoreError::Domain(DomainError::validation(format!("line number out of range: {e}")))
        })?)
        .bind(line.product_id.as_uuid())
        .bind(line.requested.value())
        .bind(line.applied.value())
        .bind(line.uom.as_str())
        .bind(line.recorded.map(|q| q.value()))
        .bind(line.reason.as_deref())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_document_line", e))?;
    }
    Ok(())
}

// Row decoding

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Database(format!("failed to read column {name}: {e}")))
}

fn quantity_column(row: &PgRow, name: &str) -> Result<Quantity, StoreError> {
    column::<Decimal>(row, name).map(Quantity::new)
}

fn uom_column(row: &PgRow, name: &str) -> Result<Uom, StoreError> {
    let raw: String = column(row, name)?;
    Uom::new(raw).map_err(corrupt(name))
}

fn corrupt(what: &str) -> impl FnOnce(DomainError) -> StoreError + '_ {
    move |e| StoreError::Database(format!("corrupt {what}: {e}"))
}

fn snapshot_from_row(row: &PgRow) -> Result<StockSnapshot, StoreError> {
    let product_id: Uuid = column(row, "product_id")?;
    let warehouse_id: Uuid = column(row, "warehouse_id")?;
    let location_id: Uuid = column(row, "location_id")?;
    let updated_at: DateTime<Utc> = column(row, "updated_at")?;
    Ok(StockSnapshot {
        product_id: ProductId::from_uuid(product_id),
        warehouse_id: WarehouseId::from_uuid(warehouse_id),
        location_id: LocationId::from_uuid(location_id),
        quantity: quantity_column(row, "quantity")?,
        uom: uom_column(row, "uom")?,
        updated_at,
    })
}

fn movement_from_row(row: &PgRow) -> Result<MovementEntry, StoreError> {
    let id: Uuid = column(row, "id")?;
    let movement_type: String = column(row, "movement_type")?;
    let product_id: Uuid = column(row, "product_id")?;
    let from_location: Option<Uuid> = column(row, "from_location_id")?;
    let to_location: Option<Uuid> = column(row, "to_location_id")?;
    let created_by: Option<Uuid> = column(row, "created_by")?;
    Ok(MovementEntry {
        id: MovementId::from_uuid(id),
        movement_type: movement_type
            .parse()
            .map_err(corrupt("movement_entries.movement_type"))?,
        reference: column(row, "reference")?,
        product_id: ProductId::from_uuid(product_id),
        from_location: from_location.map(LocationId::from_uuid),
        to_location: to_location.map(LocationId::from_uuid),
        quantity: quantity_column(row, "quantity")?,
        uom: uom_column(row, "uom")?,
        status: MovementStatus::Done,
        created_by: created_by.map(UserId::from_uuid),
        created_at: column(row, "created_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let id: Uuid = column(row, "id")?;
    let sku: String = column(row, "sku")?;
    let name: String = column(row, "name")?;
    let threshold: Option<Decimal> = column(row, "reorder_threshold")?;
    let product = Product::new(ProductId::from_uuid(id), sku, name, uom_column(row, "uom")?)
        .map_err(corrupt("products"))?;
    match threshold {
        Some(t) => product
            .with_reorder_threshold(Quantity::new(t))
            .map_err(corrupt("products.reorder_threshold")),
        None => Ok(product),
    }
}

fn location_from_row(row: &PgRow) -> Result<Location, StoreError> {
    let id: Uuid = column(row, "id")?;
    let warehouse_id: Uuid = column(row, "warehouse_id")?;
    let name: String = column(row, "name")?;
    let capacity: Option<Decimal> = column(row, "capacity")?;
    let uom: Option<String> = column(row, "uom")?;
    let mut location = Location::new(
        LocationId::from_uuid(id),
        WarehouseId::from_uuid(warehouse_id),
        name,
    );
    location.capacity = capacity.map(Quantity::new);
    location.uom = uom
        .map(Uom::new)
        .transpose()
        .map_err(corrupt("locations.uom"))?;
    Ok(location)
}

fn encode_target(target: &DocumentTarget) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(target)
        .map_err(|e| StoreError::Database(format!("failed to encode document target: {e}")))
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Database(format!("document version {version} out of range")))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation, serialization failure, deadlock.
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                // Foreign key violation: an unknown product/location/warehouse.
                Some("23503") => StoreError::Domain(DomainError::not_found(msg)),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    //! Run against the database named by `DATABASE_URL`; skipped when unset.
    //! Every fixture creates its own warehouse, locations and product.

    use std::sync::Arc;
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;
    use stockmaster_inventory::{
        CountLine, DocumentStatus, MovementRequest, MovementType, NewLine, ReceiveLine,
    };

    use super::*;
    use crate::documents::{DocumentService, NewDocument};
    use crate::movement_engine::{EngineConfig, MovementEngine, MovementError};
    use crate::notify::LoggingNotifier;

    struct Fixture {
        store: PostgresStockStore,
        engine: MovementEngine<PostgresStockStore, LoggingNotifier>,
        documents: DocumentService<PostgresStockStore>,
        warehouse: WarehouseId,
        l1: LocationId,
        l2: LocationId,
        product: ProductId,
    }

    fn qty(n: i64) -> Quantity {
        Quantity::from_i64(n)
    }

    async fn fixture() -> Option<Fixture> {
        let url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())?;
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .expect("DATABASE_URL is set but unreachable");
        let store = PostgresStockStore::new(pool);
        store.migrate().await.unwrap();

        let tag = Uuid::now_v7().simple().to_string();
        let warehouse = Warehouse::new(WarehouseId::new(), format!("WH-{tag}"), "Main").unwrap();
        store.upsert_warehouse(&warehouse).await.unwrap();
        let l1 = Location::new(LocationId::new(), warehouse.id, "WH/Stock");
        let l2 = Location::new(LocationId::new(), warehouse.id, "WH/Shelf");
        store.upsert_location(&l1).await.unwrap();
        store.upsert_location(&l2).await.unwrap();
        let product =
            Product::new(ProductId::new(), format!("SKU-{tag}"), "Pallet jack", Uom::pieces())
                .unwrap();
        store.upsert_product(&product).await.unwrap();

        Some(Fixture {
            engine: MovementEngine::new(store.clone(), LoggingNotifier, EngineConfig::default()),
            documents: DocumentService::new(store.clone()),
            store,
            warehouse: warehouse.id,
            l1: l1.id,
            l2: l2.id,
            product: product.id_typed(),
        })
    }

    impl Fixture {
        async fn draft(&self, target: DocumentTarget, q: Option<i64>) -> Document {
            let mut new = NewDocument::new(target);
            if let Some(q) = q {
                new = new.line(NewLine::new(self.product, qty(q), Uom::pieces()));
            }
            self.documents.create_draft(new).await.unwrap()
        }

        async fn receive(&self, location: LocationId, q: i64) {
            let doc = self
                .draft(
                    DocumentTarget::Receipt {
                        warehouse_id: self.warehouse,
                        location_id: location,
                        supplier: None,
                    },
                    Some(q),
                )
                .await;
            self.documents.confirm(doc.id_typed()).await.unwrap();
            self.engine
                .receive(MovementRequest::new(
                    doc.id_typed(),
                    vec![ReceiveLine::new(self.product, qty(q))],
                ))
                .await
                .unwrap();
        }

        async fn delivery(&self, q: i64) -> Document {
            self.draft(
                DocumentTarget::Delivery {
                    warehouse_id: self.warehouse,
                    customer: None,
                },
                Some(q),
            )
            .await
        }

        async fn adjustment(&self, location: LocationId) -> Document {
            self.draft(
                DocumentTarget::Adjustment {
                    warehouse_id: self.warehouse,
                    location_id: location,
                },
                None,
            )
            .await
        }

        async fn count(&self, location: LocationId, q: i64) -> Result<(), MovementError> {
            let doc = self.adjustment(location).await;
            self.engine
                .post_adjustment(MovementRequest::new(
                    doc.id_typed(),
                    vec![CountLine::new(self.product, qty(q))],
                ))
                .await
                .map(|_| ())
        }

        async fn at(&self, location: LocationId) -> Quantity {
            self.store
                .get_quantity(SnapshotKey::new(self.product, location))
                .await
                .unwrap()
        }

        async fn assert_ledger_explains_snapshots(&self) {
            let ledger = self.store.list_by_product(self.product).await.unwrap();
            for location in [self.l1, self.l2] {
                assert_eq!(
                    MovementEntry::balance(&ledger, self.product, location),
                    self.at(location).await,
                    "ledger and snapshot disagree at {location}"
                );
            }
        }
    }

    #[tokio::test]
    async fn receive_deliver_transfer_count_scenario() {
        let Some(fx) = fixture().await else { return };

        fx.receive(fx.l1, 50).await;
        assert_eq!(fx.at(fx.l1).await, qty(50));

        let delivery = fx.delivery(30).await;
        let delivered = fx
            .engine
            .validate_delivery(MovementRequest::new(delivery.id_typed(), vec![]))
            .await
            .unwrap();
        assert_eq!(delivered.movements[0].from_location, Some(fx.l1));
        assert_eq!(fx.at(fx.l1).await, qty(20));

        let transfer = fx
            .draft(
                DocumentTarget::Transfer {
                    from_warehouse_id: fx.warehouse,
                    from_location_id: fx.l1,
                    to_warehouse_id: fx.warehouse,
                    to_location_id: fx.l2,
                },
                Some(20),
            )
            .await;
        fx.engine
            .validate_transfer(MovementRequest::new(transfer.id_typed(), vec![]))
            .await
            .unwrap();
        assert!(fx.at(fx.l1).await.is_zero());
        assert_eq!(fx.at(fx.l2).await, qty(20));

        fx.count(fx.l2, 15).await.unwrap();
        assert_eq!(fx.at(fx.l2).await, qty(15));

        let ledger = fx.store.list_by_product(fx.product).await.unwrap();
        let types: Vec<_> = ledger.iter().map(|m| m.movement_type).collect();
        assert_eq!(
            types,
            [
                MovementType::Receipt,
                MovementType::Delivery,
                MovementType::Internal,
                MovementType::Adjustment
            ]
        );
        assert_eq!(ledger[3].quantity, qty(5));
        assert_eq!(ledger[3].from_location, Some(fx.l2));
        fx.assert_ledger_explains_snapshots().await;
    }

    #[tokio::test]
    async fn insufficient_stock_rolls_the_whole_operation_back() {
        let Some(fx) = fixture().await else { return };
        fx.receive(fx.l1, 4).await;

        let delivery = fx.delivery(5).await;
        let err = fx
            .engine
            .validate_delivery(MovementRequest::new(delivery.id_typed(), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, MovementError::InsufficientStock { .. }));

        assert_eq!(fx.at(fx.l1).await, qty(4));
        assert_eq!(fx.store.list_by_product(fx.product).await.unwrap().len(), 1);
        let stored = fx.store.get_document(delivery.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.status(), DocumentStatus::Draft);
        assert_eq!(stored.version(), delivery.version());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_never_oversell() {
        let Some(fx) = fixture().await else { return };
        let fx = Arc::new(fx);
        fx.receive(fx.l1, 10).await;

        let mut docs = Vec::new();
        for _ in 0..5 {
            docs.push(fx.delivery(3).await.id_typed());
        }
        let handles: Vec<_> = docs
            .into_iter()
            .map(|id| {
                let fx = fx.clone();
                tokio::spawn(async move {
                    fx.engine
                        .validate_delivery(MovementRequest::new(id, vec![]))
                        .await
                })
            })
            .collect();

        let mut delivered = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => delivered += 1,
                Err(MovementError::InsufficientStock { .. }) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(delivered, 3);
        assert_eq!(fx.at(fx.l1).await, qty(1));
        fx.assert_ledger_explains_snapshots().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_counts_of_an_empty_location_book_once() {
        let Some(fx) = fixture().await else { return };
        let fx = Arc::new(fx);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let fx = fx.clone();
                tokio::spawn(async move { fx.count(fx.l2, 5).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fx.at(fx.l2).await, qty(5));
        let ledger = fx.store.list_by_product(fx.product).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].to_location, Some(fx.l2));
        fx.assert_ledger_explains_snapshots().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn count_waits_for_an_uncommitted_receipt() {
        let Some(fx) = fixture().await else { return };
        let fx = Arc::new(fx);

        let mut receipt = fx.store.begin().await.unwrap();
        receipt
            .apply_delta(
                SnapshotKey::new(fx.product, fx.l1),
                fx.warehouse,
                qty(10),
                &Uom::pieces(),
                NegativeStock::Reject,
            )
            .await
            .unwrap();
        receipt
            .append_movement(
                NewMovement::receipt("REC-RAW", fx.product, fx.l1, qty(10), Uom::pieces())
                    .unwrap(),
            )
            .await
            .unwrap();

        let count = {
            let fx = fx.clone();
            tokio::spawn(async move { fx.count(fx.l1, 5).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!count.is_finished(), "the count must block on the receipt's row");
        receipt.commit().await.unwrap();
        count.await.unwrap().unwrap();

        assert_eq!(fx.at(fx.l1).await, qty(5));
        let ledger = fx.store.list_by_product(fx.product).await.unwrap();
        let adjustment = ledger.last().unwrap();
        assert_eq!(adjustment.movement_type, MovementType::Adjustment);
        assert_eq!(adjustment.from_location, Some(fx.l1));
        assert_eq!(adjustment.quantity, qty(5));
        fx.assert_ledger_explains_snapshots().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_retries_with_one_key_apply_once() {
        let Some(fx) = fixture().await else { return };
        let fx = Arc::new(fx);
        fx.receive(fx.l1, 20).await;

        let delivery = fx.delivery(4).await;
        let key = IdempotencyKey::new(format!("deliver-{}", delivery.id_typed())).unwrap();
        let request = MovementRequest::new(delivery.id_typed(), vec![]).with_idempotency_key(key);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (fx, request) = (fx.clone(), request.clone());
                tokio::spawn(async move { fx.engine.validate_delivery(request).await })
            })
            .collect();
        let mut fresh = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome.document.status(), DocumentStatus::Done);
            if !outcome.replayed {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(fx.at(fx.l1).await, qty(16));
        fx.assert_ledger_explains_snapshots().await;
    }
}
