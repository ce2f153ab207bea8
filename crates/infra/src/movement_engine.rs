//! Movement operations: applying a stock document to snapshots and the ledger.
//!
//! Every operation follows the same pipeline inside one store transaction:
//!
//! ```text
//! request
//!   ↓
//! 1. Validate request lines (no store access)
//!   ↓
//! 2. Idempotency check (replay a committed outcome or reject a reused key)
//!   ↓
//! 3. Load document for update, gate on kind + status, load products
//!   ↓
//! 4. Mutate snapshots (atomic deltas / absolute counts) and append ledger entries
//!   ↓
//! 5. Record idempotency key, flip document to `done` (last write), commit
//!   ↓
//! 6. Low-stock signal per distinct (product, warehouse), after commit
//! ```
//!
//! Any error before the commit drops the transaction: no snapshot, ledger or
//! document change survives.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument};

use stockmaster_core::{
    DocumentId, DomainError, LocationId, ProductId, Quantity, Uom, WarehouseId,
};
use stockmaster_inventory::{
    CountLine, Document, DocumentTarget, IdempotencyKey, MovementEntry, MovementOperation,
    MovementRequest, NegativeStock, NewMovement, PickLine, Product, ReceiveLine, RequestLine,
    SnapshotKey, TransferLine, TransferVariancePolicy, pick_location,
};

use crate::notify::{LowStockSignal, Notifier};
use crate::store::{RecordedOperation, StockStore, StockTransaction, StoreError};

/// Error class, for callers that map failures onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input; rejected before any mutation.
    Validation,
    /// Document status forbids the action; rejected before any mutation.
    State,
    /// Detected mid-operation; the whole transaction was rolled back.
    Consistency,
    /// Storage failure.
    Infrastructure,
}

/// Movement operation / document service failure.
#[derive(Debug, Error)]
pub enum MovementError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("document {reference} is not editable in status '{status}'")]
    DocumentNotEditable { reference: String, status: String },

    #[error("document {reference} cannot {action} from status '{from}'")]
    InvalidTransition {
        reference: String,
        from: String,
        action: String,
    },

    #[error("insufficient stock for product {product} (available: {available}, requested: {requested})")]
    InsufficientStock {
        product: ProductId,
        location: Option<LocationId>,
        available: Quantity,
        requested: Quantity,
    },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Lost an optimistic race, or an idempotency key was reused for
    /// something else.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Store(String),
}

impl MovementError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MovementError::Validation(_) | MovementError::ReferenceNotFound(_) => {
                ErrorCategory::Validation
            }
            MovementError::DocumentNotEditable { .. } | MovementError::InvalidTransition { .. } => {
                ErrorCategory::State
            }
            MovementError::InsufficientStock { .. }
            | MovementError::InvariantViolation(_)
            | MovementError::Conflict(_) => ErrorCategory::Consistency,
            MovementError::Store(_) => ErrorCategory::Infrastructure,
        }
    }
}

impl From<DomainError> for MovementError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                MovementError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => MovementError::InvariantViolation(msg),
            DomainError::ReferenceNotFound(msg) => MovementError::ReferenceNotFound(msg),
            DomainError::InsufficientStock {
                product,
                location,
                available,
                requested,
            } => MovementError::InsufficientStock {
                product,
                location,
                available,
                requested,
            },
            DomainError::DocumentNotEditable { reference, status } => {
                MovementError::DocumentNotEditable { reference, status }
            }
            DomainError::InvalidTransition {
                reference,
                from,
                action,
            } => MovementError::InvalidTransition {
                reference,
                from,
                action,
            },
            DomainError::Conflict(msg) => MovementError::Conflict(msg),
        }
    }
}

impl From<StoreError> for MovementError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(err) => err.into(),
            StoreError::Conflict(msg) => MovementError::Conflict(msg),
            StoreError::Database(msg) => MovementError::Store(msg),
            StoreError::Poisoned => MovementError::Store("store lock poisoned".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub transfer_variance: TransferVariancePolicy,
    /// Upper bound on one low-stock notification.
    pub notify_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transfer_variance: TransferVariancePolicy::default(),
            notify_timeout: Duration::from_millis(2000),
        }
    }
}

/// What a committed (or replayed) movement operation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementOutcome {
    /// The document after the operation (status `done`).
    pub document: Document,
    /// Ledger entries appended by the operation, in append order.
    pub movements: Vec<MovementEntry>,
    /// `true` when an idempotency key matched an earlier commit and nothing
    /// was applied this time.
    pub replayed: bool,
}

enum Opened {
    Replayed(MovementOutcome),
    Fresh {
        tx: Box<dyn StockTransaction>,
        document: Document,
    },
}

/// A document line collapsed per product, with the quantity to apply.
#[derive(Debug, Clone)]
struct PlannedLine {
    product_id: ProductId,
    committed: Quantity,
    quantity: Quantity,
    uom: Uom,
}

/// Reusable execution engine for the four movement operations.
///
/// ## Generic Parameters
///
/// - `S`: stock store (in-memory or Postgres)
/// - `N`: low-stock notification collaborator
pub struct MovementEngine<S, N> {
    store: S,
    signal: LowStockSignal<N>,
    config: EngineConfig,
}

impl<S, N> MovementEngine<S, N>
where
    S: StockStore,
    N: Notifier,
{
    pub fn new(store: S, notifier: N, config: EngineConfig) -> Self {
        Self {
            store,
            signal: LowStockSignal::new(notifier, config.notify_timeout),
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &N {
        self.signal.notifier()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive goods into the receipt's location.
    ///
    /// Only the request lines are applied; each must name a product on the
    /// document. Never triggers the low-stock signal.
    #[instrument(
        skip(self, request),
        fields(document_id = %request.document_id, operation = "receive"),
        err
    )]
    pub async fn receive(
        &self,
        request: MovementRequest<ReceiveLine>,
    ) -> Result<MovementOutcome, MovementError> {
        let op = MovementOperation::Receive;
        let (mut tx, mut document) = match self.open(op, &request).await? {
            Opened::Replayed(outcome) => return Ok(outcome),
            Opened::Fresh { tx, document } => (tx, document),
        };
        let (warehouse_id, location_id) = match document.target() {
            DocumentTarget::Receipt {
                warehouse_id,
                location_id,
                ..
            } => (*warehouse_id, *location_id),
            _ => return Err(target_mismatch(&document)),
        };

        for line in &request.lines {
            ensure_on_document(&document, line.product_id)?;
        }
        let products =
            load_products(&mut tx, request.lines.iter().map(|l| l.product_id).collect())
                .await?;

        let reference = document.reference().to_string();
        let mut movements = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let product = product(&products, line.product_id)?;
            let uom = line
                .uom
                .clone()
                .or_else(|| document.line_for(line.product_id).map(|l| l.uom.clone()))
                .unwrap_or_else(|| product.uom().clone());

            tx.apply_delta(
                SnapshotKey::new(line.product_id, location_id),
                warehouse_id,
                line.qty_received,
                &uom,
                NegativeStock::Reject,
            )
            .await?;
            let movement = NewMovement::receipt(
                &reference,
                line.product_id,
                location_id,
                line.qty_received,
                uom,
            )?
            .by(request.actor);
            movements.push(tx.append_movement(movement).await?);
            document.record_applied(line.product_id, line.qty_received)?;
        }

        self.finish(tx, document, movements, op, request.idempotency_key.as_ref(), Vec::new())
            .await
    }

    /// Pick and ship every product on a delivery.
    ///
    /// Request lines override the picked quantity per product; products not
    /// named in the request ship their requested quantity. Each product is
    /// picked from a single location (see [`pick_location`]).
    #[instrument(
        skip(self, request),
        fields(document_id = %request.document_id, operation = "validate_delivery"),
        err
    )]
    pub async fn validate_delivery(
        &self,
        request: MovementRequest<PickLine>,
    ) -> Result<MovementOutcome, MovementError> {
        let op = MovementOperation::ValidateDelivery;
        let (mut tx, mut document) = match self.open(op, &request).await? {
            Opened::Replayed(outcome) => return Ok(outcome),
            Opened::Fresh { tx, document } => (tx, document),
        };
        let warehouse_id = match document.target() {
            DocumentTarget::Delivery { warehouse_id, .. } => *warehouse_id,
            _ => return Err(target_mismatch(&document)),
        };

        let overrides: Vec<(ProductId, Quantity)> = request
            .lines
            .iter()
            .map(|l| (l.product_id, l.qty_picked))
            .collect();
        let planned = plan_lines(&document, &overrides)?;
        let products =
            load_products(&mut tx, planned.iter().map(|l| l.product_id).collect()).await?;

        let reference = document.reference().to_string();
        let mut movements = Vec::with_capacity(planned.len());
        let mut low_stock = Vec::with_capacity(planned.len());
        for line in &planned {
            let product = product(&products, line.product_id)?;
            let candidates = tx
                .locations_with_stock(line.product_id, warehouse_id)
                .await?;
            let location_id = pick_location(line.product_id, &candidates, line.quantity)?;

            tx.apply_delta(
                SnapshotKey::new(line.product_id, location_id),
                warehouse_id,
                -line.quantity,
                &line.uom,
                NegativeStock::Reject,
            )
            .await?;
            let movement = NewMovement::delivery(
                &reference,
                line.product_id,
                location_id,
                line.quantity,
                line.uom.clone(),
            )?
            .by(request.actor);
            movements.push(tx.append_movement(movement).await?);
            document.record_applied(line.product_id, line.quantity)?;
            low_stock.push((product.clone(), warehouse_id));
        }

        self.finish(tx, document, movements, op, request.idempotency_key.as_ref(), low_stock)
            .await
    }

    /// Move every product on a transfer from its source to its destination.
    ///
    /// Request lines carry the quantity received at the destination; the
    /// configured [`TransferVariancePolicy`] decides how a difference from the
    /// committed quantity is booked.
    #[instrument(
        skip(self, request),
        fields(
            document_id = %request.document_id,
            operation = "validate_transfer",
            policy = ?self.config.transfer_variance
        ),
        err
    )]
    pub async fn validate_transfer(
        &self,
        request: MovementRequest<TransferLine>,
    ) -> Result<MovementOutcome, MovementError> {
        let op = MovementOperation::ValidateTransfer;
        let (mut tx, mut document) = match self.open(op, &request).await? {
            Opened::Replayed(outcome) => return Ok(outcome),
            Opened::Fresh { tx, document } => (tx, document),
        };
        let (from_warehouse, from_location, to_warehouse, to_location) = match document.target() {
            DocumentTarget::Transfer {
                from_warehouse_id,
                from_location_id,
                to_warehouse_id,
                to_location_id,
            } => (
                *from_warehouse_id,
                *from_location_id,
                *to_warehouse_id,
                *to_location_id,
            ),
            _ => return Err(target_mismatch(&document)),
        };

        let overrides: Vec<(ProductId, Quantity)> = request
            .lines
            .iter()
            .map(|l| (l.product_id, l.qty_received))
            .collect();
        let planned = plan_lines(&document, &overrides)?;
        let products =
            load_products(&mut tx, planned.iter().map(|l| l.product_id).collect()).await?;

        let reference = document.reference().to_string();
        let mut movements = Vec::with_capacity(planned.len());
        let mut low_stock = Vec::with_capacity(planned.len());
        for line in &planned {
            let product = product(&products, line.product_id)?;
            let plan = self
                .config
                .transfer_variance
                .plan(line.committed, line.quantity);

            tx.apply_delta(
                SnapshotKey::new(line.product_id, from_location),
                from_warehouse,
                -plan.source_decrement,
                &line.uom,
                NegativeStock::Reject,
            )
            .await?;
            tx.apply_delta(
                SnapshotKey::new(line.product_id, to_location),
                to_warehouse,
                plan.destination_increment,
                &line.uom,
                NegativeStock::Reject,
            )
            .await?;

            let internal = NewMovement::internal(
                &reference,
                line.product_id,
                from_location,
                to_location,
                plan.internal_quantity,
                line.uom.clone(),
            )?
            .by(request.actor);
            movements.push(tx.append_movement(internal).await?);

            let corrections = [
                plan.shortfall_at_source.map(|q| (from_location, -q)),
                plan.surplus_at_destination.map(|q| (to_location, q)),
            ];
            for (location_id, difference) in corrections.into_iter().flatten() {
                if let Some(movement) = NewMovement::adjustment(
                    &reference,
                    line.product_id,
                    location_id,
                    difference,
                    line.uom.clone(),
                )? {
                    movements.push(tx.append_movement(movement.by(request.actor)).await?);
                }
            }

            document.record_applied(line.product_id, line.quantity)?;
            low_stock.push((product.clone(), from_warehouse));
        }

        self.finish(tx, document, movements, op, request.idempotency_key.as_ref(), low_stock)
            .await
    }

    /// Post physical counts at the adjustment's location.
    ///
    /// Each counted quantity replaces the snapshot; the difference from the
    /// recorded quantity becomes one adjustment entry (none when zero).
    #[instrument(
        skip(self, request),
        fields(document_id = %request.document_id, operation = "post_adjustment"),
        err
    )]
    pub async fn post_adjustment(
        &self,
        request: MovementRequest<CountLine>,
    ) -> Result<MovementOutcome, MovementError> {
        let op = MovementOperation::PostAdjustment;
        let (mut tx, mut document) = match self.open(op, &request).await? {
            Opened::Replayed(outcome) => return Ok(outcome),
            Opened::Fresh { tx, document } => (tx, document),
        };
        let (warehouse_id, location_id) = match document.target() {
            DocumentTarget::Adjustment {
                warehouse_id,
                location_id,
            } => (*warehouse_id, *location_id),
            _ => return Err(target_mismatch(&document)),
        };

        let products =
            load_products(&mut tx, request.lines.iter().map(|l| l.product_id).collect())
                .await?;

        let reference = document.reference().to_string();
        let mut movements = Vec::new();
        let mut low_stock = Vec::new();
        for line in &request.lines {
            let product = product(&products, line.product_id)?;
            let uom = line
                .uom
                .clone()
                .or_else(|| document.line_for(line.product_id).map(|l| l.uom.clone()))
                .unwrap_or_else(|| product.uom().clone());

            let recorded = tx
                .set_quantity(
                    SnapshotKey::new(line.product_id, location_id),
                    warehouse_id,
                    line.qty_counted,
                    &uom,
                )
                .await?;
            let difference = line.qty_counted - recorded;
            if let Some(movement) = NewMovement::adjustment(
                &reference,
                line.product_id,
                location_id,
                difference,
                uom.clone(),
            )? {
                movements.push(tx.append_movement(movement.by(request.actor)).await?);
            }
            document.record_count(
                line.product_id,
                recorded,
                line.qty_counted,
                line.reason.clone(),
                uom,
            );
            if difference.is_negative() {
                low_stock.push((product.clone(), warehouse_id));
            }
        }

        self.finish(tx, document, movements, op, request.idempotency_key.as_ref(), low_stock)
            .await
    }

    async fn open<L: RequestLine>(
        &self,
        op: MovementOperation,
        request: &MovementRequest<L>,
    ) -> Result<Opened, MovementError> {
        request.validate()?;

        let mut tx = self.store.begin().await?;
        if let Some(recorded) = recorded_operation(&mut tx, request).await? {
            drop(tx);
            return self.replay_recorded(op, request, recorded).await;
        }

        let document = tx
            .load_document(request.document_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("document {}", request.document_id)))?;
        // A concurrent call with the same key may have committed while we
        // waited for the document row.
        if let Some(recorded) = recorded_operation(&mut tx, request).await? {
            drop(tx);
            return self.replay_recorded(op, request, recorded).await;
        }
        document.begin(op)?;
        Ok(Opened::Fresh { tx, document })
    }

    async fn replay_recorded<L: RequestLine>(
        &self,
        op: MovementOperation,
        request: &MovementRequest<L>,
        recorded: RecordedOperation,
    ) -> Result<Opened, MovementError> {
        if recorded.document_id != request.document_id || recorded.operation != op {
            return Err(MovementError::Conflict(format!(
                "idempotency key '{}' was already used to {} document {}",
                request
                    .idempotency_key
                    .as_ref()
                    .map(IdempotencyKey::as_str)
                    .unwrap_or_default(),
                recorded.operation.action(),
                recorded.document_id
            )));
        }
        self.replay(request.document_id).await.map(Opened::Replayed)
    }

    async fn replay_committed(
        &self,
        key: &IdempotencyKey,
        op: MovementOperation,
        document_id: DocumentId,
    ) -> Result<Option<MovementOutcome>, MovementError> {
        let recorded = {
            let mut tx = self.store.begin().await?;
            tx.find_operation(key).await?
        };
        match recorded {
            Some(r) if r.document_id == document_id && r.operation == op => {
                self.replay(document_id).await.map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn replay(&self, document_id: DocumentId) -> Result<MovementOutcome, MovementError> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("document {document_id}")))?;
        let movements = self.store.list_by_reference(document.reference()).await?;
        info!(
            reference = document.reference(),
            entries = movements.len(),
            "movement operation replayed"
        );
        Ok(MovementOutcome {
            document,
            movements,
            replayed: true,
        })
    }

    async fn finish(
        &self,
        mut tx: Box<dyn StockTransaction>,
        mut document: Document,
        movements: Vec<MovementEntry>,
        op: MovementOperation,
        idempotency_key: Option<&IdempotencyKey>,
        low_stock: Vec<(Product, WarehouseId)>,
    ) -> Result<MovementOutcome, MovementError> {
        if let Some(key) = idempotency_key {
            tx.record_operation(
                key,
                RecordedOperation {
                    document_id: document.id_typed(),
                    operation: op,
                },
            )
            .await?;
        }
        // The status flip is the transaction's last write.
        document.complete(Utc::now())?;
        tx.save_document(&mut document).await?;
        if let Err(err) = tx.commit().await {
            // Losing an optimistic race to a call carrying the same key is a
            // retry, not a failure.
            if let (StoreError::Conflict(_), Some(key)) = (&err, idempotency_key) {
                if let Some(outcome) = self.replay_committed(key, op, document.id_typed()).await? {
                    return Ok(outcome);
                }
            }
            return Err(err.into());
        }

        info!(
            reference = document.reference(),
            kind = document.kind().as_str(),
            operation = op.as_str(),
            entries = movements.len(),
            "movement operation committed"
        );

        let mut checked = BTreeSet::new();
        for (product, warehouse_id) in &low_stock {
            if checked.insert((product.id_typed(), *warehouse_id)) {
                self.signal
                    .check_and_notify(&self.store, product, *warehouse_id)
                    .await;
            }
        }

        Ok(MovementOutcome {
            document,
            movements,
            replayed: false,
        })
    }
}

fn target_mismatch(document: &Document) -> MovementError {
    MovementError::InvariantViolation(format!(
        "document {} header does not match its kind '{}'",
        document.reference(),
        document.kind().as_str()
    ))
}

fn ensure_on_document(document: &Document, product_id: ProductId) -> Result<(), MovementError> {
    if document.line_for(product_id).is_none() {
        return Err(MovementError::Validation(format!(
            "product {product_id} is not on document {}",
            document.reference()
        )));
    }
    Ok(())
}

/// Collapse document lines per product (first-seen order) and apply request
/// overrides.
fn plan_lines(
    document: &Document,
    overrides: &[(ProductId, Quantity)],
) -> Result<Vec<PlannedLine>, MovementError> {
    for (product_id, _) in overrides {
        ensure_on_document(document, *product_id)?;
    }

    let mut planned: Vec<PlannedLine> = Vec::new();
    for line in document.lines() {
        match planned.iter_mut().find(|p| p.product_id == line.product_id) {
            Some(existing) => {
                existing.committed = existing.committed.checked_add(line.requested)?;
            }
            None => planned.push(PlannedLine {
                product_id: line.product_id,
                committed: line.requested,
                quantity: line.requested,
                uom: line.uom.clone(),
            }),
        }
    }
    if planned.is_empty() {
        return Err(MovementError::Validation(format!(
            "document {} has no lines",
            document.reference()
        )));
    }

    for line in &mut planned {
        line.quantity = overrides
            .iter()
            .find(|(product_id, _)| *product_id == line.product_id)
            .map(|(_, quantity)| *quantity)
            .unwrap_or(line.committed);
    }
    Ok(planned)
}

async fn recorded_operation<L: RequestLine>(
    tx: &mut Box<dyn StockTransaction>,
    request: &MovementRequest<L>,
) -> Result<Option<RecordedOperation>, MovementError> {
    match &request.idempotency_key {
        Some(key) => Ok(tx.find_operation(key).await?),
        None => Ok(None),
    }
}

async fn load_products(
    tx: &mut Box<dyn StockTransaction>,
    ids: Vec<ProductId>,
) -> Result<BTreeMap<ProductId, Product>, MovementError> {
    let mut products = BTreeMap::new();
    for id in ids {
        if products.contains_key(&id) {
            continue;
        }
        let product = tx
            .load_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))?;
        products.insert(id, product);
    }
    Ok(products)
}

fn product(
    products: &BTreeMap<ProductId, Product>,
    id: ProductId,
) -> Result<&Product, MovementError> {
    products
        .get(&id)
        .ok_or_else(|| MovementError::ReferenceNotFound(format!("product {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockmaster_inventory::{DocumentStatus, NewLine};

    fn qty(n: i64) -> Quantity {
        Quantity::from_i64(n)
    }

    fn delivery_with(lines: &[(ProductId, i64)]) -> Document {
        let mut doc = Document::draft(
            DocumentId::new(),
            Some("DEL-1".to_string()),
            DocumentTarget::Delivery {
                warehouse_id: WarehouseId::new(),
                customer: None,
            },
            None,
            Utc::now(),
        )
        .unwrap();
        for (product, n) in lines {
            doc.add_line(NewLine::new(*product, qty(*n), Uom::pieces()), Utc::now())
                .unwrap();
        }
        doc
    }

    #[test]
    fn plan_collapses_repeated_products_and_applies_overrides() {
        let (a, b) = (ProductId::new(), ProductId::new());
        let doc = delivery_with(&[(a, 5), (b, 3), (a, 2)]);

        let planned = plan_lines(&doc, &[(b, qty(1))]).unwrap();
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].product_id, a);
        assert_eq!(planned[0].committed, qty(7));
        assert_eq!(planned[0].quantity, qty(7));
        assert_eq!(planned[1].committed, qty(3));
        assert_eq!(planned[1].quantity, qty(1));
    }

    #[test]
    fn plan_rejects_products_missing_from_the_document() {
        let doc = delivery_with(&[(ProductId::new(), 5)]);
        match plan_lines(&doc, &[(ProductId::new(), qty(1))]) {
            Err(MovementError::Validation(msg)) if msg.contains("not on document DEL-1") => {}
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn plan_requires_lines() {
        let doc = delivery_with(&[]);
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert!(matches!(
            plan_lines(&doc, &[]),
            Err(MovementError::Validation(_))
        ));
    }

    #[test]
    fn errors_are_categorized() {
        let not_found: MovementError = DomainError::not_found("product x").into();
        assert_eq!(not_found.category(), ErrorCategory::Validation);

        let transition: MovementError =
            DomainError::invalid_transition("REC-1", "done", "receive").into();
        assert_eq!(transition.category(), ErrorCategory::State);

        let short: MovementError = StoreError::Domain(DomainError::insufficient_stock(
            ProductId::new(),
            None,
            qty(1),
            qty(2),
        ))
        .into();
        assert_eq!(short.category(), ErrorCategory::Consistency);

        let db: MovementError = StoreError::Database("connection reset".to_string()).into();
        assert_eq!(db.category(), ErrorCategory::Infrastructure);
    }
}
