//! Stock documents and their status lifecycle.
//!
//! ```text
//! draft ──confirm──▶ waiting ──mark_ready──▶ ready ──(movement op)──▶ done
//!   │                   │                      │
//!   └───────────────────┴────────cancel────────┴──────────────────▶ canceled
//! ```
//!
//! `done` is never reached through a plain status flip: it is the last write a
//! movement operation makes inside its transaction (see `Document::complete`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockmaster_core::{
    AggregateRoot, DocumentId, DomainError, DomainResult, LocationId, ProductId, Quantity, Uom,
    UserId, WarehouseId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Receipt,
    Delivery,
    Transfer,
    Adjustment,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Receipt => "receipt",
            DocumentKind::Delivery => "delivery",
            DocumentKind::Transfer => "transfer",
            DocumentKind::Adjustment => "adjustment",
        }
    }

    pub fn reference_prefix(&self) -> &'static str {
        match self {
            DocumentKind::Receipt => "REC",
            DocumentKind::Delivery => "DEL",
            DocumentKind::Transfer => "TRF",
            DocumentKind::Adjustment => "ADJ",
        }
    }

    /// `<PREFIX>-<unix millis>-<8 hex>`, used when the caller supplies no
    /// reference. The suffix is the random tail of the document id, so drafts
    /// created in the same millisecond still get distinct references.
    pub fn generate_reference(&self, now: DateTime<Utc>, id: DocumentId) -> String {
        let hex = id.as_uuid().simple().to_string();
        format!(
            "{}-{}-{}",
            self.reference_prefix(),
            now.timestamp_millis(),
            &hex[hex.len() - 8..]
        )
    }
}

impl core::str::FromStr for DocumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(DocumentKind::Receipt),
            "delivery" => Ok(DocumentKind::Delivery),
            "transfer" => Ok(DocumentKind::Transfer),
            "adjustment" => Ok(DocumentKind::Adjustment),
            other => Err(DomainError::validation(format!(
                "unknown document kind '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Waiting,
    Ready,
    Done,
    Canceled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Waiting => "waiting",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Done => "done",
            DocumentStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Done | DocumentStatus::Canceled)
    }
}

impl core::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for DocumentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "waiting" => Ok(DocumentStatus::Waiting),
            "ready" => Ok(DocumentStatus::Ready),
            "done" => Ok(DocumentStatus::Done),
            "canceled" => Ok(DocumentStatus::Canceled),
            other => Err(DomainError::validation(format!(
                "unknown document status '{other}'"
            ))),
        }
    }
}

/// The four movement operations and the document states each accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOperation {
    Receive,
    ValidateDelivery,
    ValidateTransfer,
    PostAdjustment,
}

impl MovementOperation {
    pub fn kind(&self) -> DocumentKind {
        match self {
            MovementOperation::Receive => DocumentKind::Receipt,
            MovementOperation::ValidateDelivery => DocumentKind::Delivery,
            MovementOperation::ValidateTransfer => DocumentKind::Transfer,
            MovementOperation::PostAdjustment => DocumentKind::Adjustment,
        }
    }

    pub fn allowed_from(&self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            MovementOperation::Receive => &[Waiting, Ready],
            MovementOperation::ValidateDelivery
            | MovementOperation::ValidateTransfer
            | MovementOperation::PostAdjustment => &[Draft, Waiting, Ready],
        }
    }

    /// Stable identifier used in idempotency records.
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementOperation::Receive => "receive",
            MovementOperation::ValidateDelivery => "validate_delivery",
            MovementOperation::ValidateTransfer => "validate_transfer",
            MovementOperation::PostAdjustment => "post_adjustment",
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            MovementOperation::Receive => "receive",
            MovementOperation::ValidateDelivery => "validate delivery",
            MovementOperation::ValidateTransfer => "validate transfer",
            MovementOperation::PostAdjustment => "post adjustment",
        }
    }
}

impl core::str::FromStr for MovementOperation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receive" => Ok(MovementOperation::Receive),
            "validate_delivery" => Ok(MovementOperation::ValidateDelivery),
            "validate_transfer" => Ok(MovementOperation::ValidateTransfer),
            "post_adjustment" => Ok(MovementOperation::PostAdjustment),
            other => Err(DomainError::validation(format!(
                "unknown movement operation '{other}'"
            ))),
        }
    }
}

impl core::fmt::Display for MovementOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.action())
    }
}

/// Kind-specific header: where the document moves stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocumentTarget {
    Receipt {
        warehouse_id: WarehouseId,
        location_id: LocationId,
        supplier: Option<String>,
    },
    Delivery {
        warehouse_id: WarehouseId,
        customer: Option<String>,
    },
    Transfer {
        from_warehouse_id: WarehouseId,
        from_location_id: LocationId,
        to_warehouse_id: WarehouseId,
        to_location_id: LocationId,
    },
    Adjustment {
        warehouse_id: WarehouseId,
        location_id: LocationId,
    },
}

impl DocumentTarget {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentTarget::Receipt { .. } => DocumentKind::Receipt,
            DocumentTarget::Delivery { .. } => DocumentKind::Delivery,
            DocumentTarget::Transfer { .. } => DocumentKind::Transfer,
            DocumentTarget::Adjustment { .. } => DocumentKind::Adjustment,
        }
    }

    /// The warehouse stock is taken from (or counted in, or received into).
    pub fn warehouse_id(&self) -> WarehouseId {
        match self {
            DocumentTarget::Receipt { warehouse_id, .. }
            | DocumentTarget::Delivery { warehouse_id, .. }
            | DocumentTarget::Adjustment { warehouse_id, .. } => *warehouse_id,
            DocumentTarget::Transfer {
                from_warehouse_id, ..
            } => *from_warehouse_id,
        }
    }

    fn validate(&self) -> DomainResult<()> {
        if let DocumentTarget::Transfer {
            from_location_id,
            to_location_id,
            ..
        } = self
        {
            if from_location_id == to_location_id {
                return Err(DomainError::validation(
                    "transfer source and destination locations must differ",
                ));
            }
        }
        Ok(())
    }
}

/// Line item: requested quantity vs. the quantity actually applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub line_no: u32,
    pub product_id: ProductId,
    /// Expected / ordered / committed / counted-at-entry quantity.
    pub requested: Quantity,
    /// Received / picked / transferred / counted quantity.
    pub applied: Quantity,
    pub uom: Uom,
    /// Adjustments only: snapshot quantity at posting time.
    pub recorded: Option<Quantity>,
    pub reason: Option<String>,
}

impl DocumentLine {
    /// `applied − requested`.
    pub fn variance(&self) -> Quantity {
        self.applied - self.requested
    }

    /// Adjustments only: `counted − recorded`.
    pub fn difference(&self) -> Option<Quantity> {
        self.recorded.map(|r| self.applied - r)
    }
}

/// A line as entered while editing a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub uom: Uom,
}

impl NewLine {
    pub fn new(product_id: ProductId, quantity: Quantity, uom: Uom) -> Self {
        Self {
            product_id,
            quantity,
            uom,
        }
    }
}

/// Persisted header fields; used by stores to rebuild a `Document`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub id: DocumentId,
    pub reference: String,
    pub target: DocumentTarget,
    pub status: DocumentStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: a stock document of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    header: DocumentHeader,
    lines: Vec<DocumentLine>,
}

impl Document {
    /// A new draft. Generates a reference when `reference` is `None` or blank.
    pub fn draft(
        id: DocumentId,
        reference: Option<String>,
        target: DocumentTarget,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        target.validate()?;
        let reference = match reference {
            Some(r) if !r.trim().is_empty() => r.trim().to_string(),
            _ => target.kind().generate_reference(now, id),
        };
        Ok(Self {
            header: DocumentHeader {
                id,
                reference,
                target,
                status: DocumentStatus::Draft,
                created_by,
                created_at: now,
                updated_at: now,
                version: 0,
            },
            lines: Vec::new(),
        })
    }

    pub fn restore(header: DocumentHeader, lines: Vec<DocumentLine>) -> Self {
        Self { header, lines }
    }

    pub fn header(&self) -> &DocumentHeader {
        &self.header
    }

    pub fn id_typed(&self) -> DocumentId {
        self.header.id
    }

    pub fn reference(&self) -> &str {
        &self.header.reference
    }

    pub fn kind(&self) -> DocumentKind {
        self.header.target.kind()
    }

    pub fn target(&self) -> &DocumentTarget {
        &self.header.target
    }

    pub fn status(&self) -> DocumentStatus {
        self.header.status
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.header.created_by
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.header.updated_at
    }

    pub fn line_for(&self, product_id: ProductId) -> Option<&DocumentLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Called by stores after a successful save.
    pub fn bump_version(&mut self) -> u64 {
        self.header.version += 1;
        self.header.version
    }

    // ---- draft editing -------------------------------------------------

    pub fn ensure_editable(&self) -> DomainResult<()> {
        if self.header.status != DocumentStatus::Draft {
            return Err(DomainError::not_editable(
                self.reference(),
                self.header.status.as_str(),
            ));
        }
        Ok(())
    }

    /// Only drafts may be deleted.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        self.ensure_editable()
    }

    pub fn add_line(&mut self, line: NewLine, now: DateTime<Utc>) -> DomainResult<u32> {
        self.ensure_editable()?;
        self.check_line_quantity(line.quantity)?;
        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        self.lines.push(DocumentLine {
            line_no,
            product_id: line.product_id,
            requested: line.quantity,
            applied: Quantity::ZERO,
            uom: line.uom,
            recorded: None,
            reason: None,
        });
        self.header.updated_at = now;
        Ok(line_no)
    }

    pub fn remove_line(&mut self, line_no: u32, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_editable()?;
        let before = self.lines.len();
        self.lines.retain(|l| l.line_no != line_no);
        if self.lines.len() == before {
            return Err(DomainError::not_found(format!(
                "line {line_no} on document {}",
                self.reference()
            )));
        }
        self.header.updated_at = now;
        Ok(())
    }

    pub fn set_line_quantity(
        &mut self,
        line_no: u32,
        quantity: Quantity,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_editable()?;
        self.check_line_quantity(quantity)?;
        let reference = self.header.reference.clone();
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.line_no == line_no)
            .ok_or_else(|| {
                DomainError::not_found(format!("line {line_no} on document {reference}"))
            })?;
        line.requested = quantity;
        self.header.updated_at = now;
        Ok(())
    }

    /// Replace every line at once (line numbers restart at 1).
    pub fn replace_lines(&mut self, lines: Vec<NewLine>, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_editable()?;
        for l in &lines {
            self.check_line_quantity(l.quantity)?;
        }
        self.lines.clear();
        for line in lines {
            self.add_line(line, now)?;
        }
        self.header.updated_at = now;
        Ok(())
    }

    fn check_line_quantity(&self, quantity: Quantity) -> DomainResult<()> {
        // A count of zero is a legitimate adjustment line.
        if self.kind() == DocumentKind::Adjustment {
            quantity.ensure_non_negative("line quantity")?;
        } else {
            quantity.ensure_positive("line quantity")?;
        }
        Ok(())
    }

    // ---- lifecycle -----------------------------------------------------

    /// `draft → waiting`.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation(format!(
                "cannot confirm document {} without lines",
                self.reference()
            )));
        }
        self.transition(&[DocumentStatus::Draft], DocumentStatus::Waiting, "confirm", now)
    }

    /// `draft | waiting → ready`.
    pub fn mark_ready(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.lines.is_empty() {
            return Err(DomainError::validation(format!(
                "cannot mark document {} ready without lines",
                self.reference()
            )));
        }
        self.transition(
            &[DocumentStatus::Draft, DocumentStatus::Waiting],
            DocumentStatus::Ready,
            "mark ready",
            now,
        )
    }

    /// Any non-terminal state `→ canceled`.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.transition(
            &[
                DocumentStatus::Draft,
                DocumentStatus::Waiting,
                DocumentStatus::Ready,
            ],
            DocumentStatus::Canceled,
            "cancel",
            now,
        )
    }

    fn transition(
        &mut self,
        allowed: &[DocumentStatus],
        to: DocumentStatus,
        action: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !allowed.contains(&self.header.status) {
            return Err(DomainError::invalid_transition(
                self.reference(),
                self.header.status.as_str(),
                action,
            ));
        }
        self.header.status = to;
        self.header.updated_at = now;
        Ok(())
    }

    // ---- movement application -----------------------------------------

    /// Gate for a movement operation: right kind, permitted status.
    pub fn begin(&self, op: MovementOperation) -> DomainResult<()> {
        if self.kind() != op.kind() {
            return Err(DomainError::validation(format!(
                "document {} is a {}, cannot {}",
                self.reference(),
                self.kind().as_str(),
                op.action()
            )));
        }
        if !op.allowed_from().contains(&self.header.status) {
            return Err(DomainError::invalid_transition(
                self.reference(),
                self.header.status.as_str(),
                op.action(),
            ));
        }
        Ok(())
    }

    /// Accumulate an applied quantity onto the first line for `product_id`.
    pub fn record_applied(&mut self, product_id: ProductId, quantity: Quantity) -> DomainResult<u32> {
        let reference = self.header.reference.clone();
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "product {product_id} is not on document {reference}"
                ))
            })?;
        line.applied = line.applied.checked_add(quantity)?;
        Ok(line.line_no)
    }

    /// Record a physical count, appending a line when the product is new to
    /// the document.
    pub fn record_count(
        &mut self,
        product_id: ProductId,
        recorded: Quantity,
        counted: Quantity,
        reason: Option<String>,
        uom: Uom,
    ) -> u32 {
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.recorded = Some(recorded);
            line.applied = counted;
            if reason.is_some() {
                line.reason = reason;
            }
            return line.line_no;
        }
        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;
        self.lines.push(DocumentLine {
            line_no,
            product_id,
            requested: counted,
            applied: counted,
            uom,
            recorded: Some(recorded),
            reason,
        });
        line_no
    }

    /// Terminal write of a movement operation.
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.header.status.is_terminal() {
            return Err(DomainError::invalid_transition(
                self.reference(),
                self.header.status.as_str(),
                "complete",
            ));
        }
        self.header.status = DocumentStatus::Done;
        self.header.updated_at = now;
        Ok(())
    }
}

impl AggregateRoot for Document {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.header.id
    }

    fn version(&self) -> u64 {
        self.header.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: i64) -> Quantity {
        Quantity::from_i64(n)
    }

    fn receipt() -> Document {
        Document::draft(
            DocumentId::new(),
            None,
            DocumentTarget::Receipt {
                warehouse_id: WarehouseId::new(),
                location_id: LocationId::new(),
                supplier: Some("ACME".to_string()),
            },
            None,
            Utc::now(),
        )
        .unwrap()
    }

    fn with_line(mut doc: Document, product_id: ProductId, n: i64) -> Document {
        doc.add_line(NewLine::new(product_id, qty(n), Uom::pieces()), Utc::now())
            .unwrap();
        doc
    }

    #[test]
    fn draft_generates_prefixed_reference() {
        let doc = receipt();
        assert!(doc.reference().starts_with("REC-"));
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert_eq!(doc.version(), 0);
    }

    #[test]
    fn drafts_in_the_same_millisecond_get_distinct_references() {
        let now = Utc::now();
        let target = DocumentTarget::Delivery {
            warehouse_id: WarehouseId::new(),
            customer: None,
        };
        let a = Document::draft(DocumentId::new(), None, target.clone(), None, now).unwrap();
        let b = Document::draft(DocumentId::new(), Some("  ".into()), target, None, now).unwrap();

        assert_ne!(a.reference(), b.reference());
        let prefix = format!("DEL-{}-", now.timestamp_millis());
        assert!(a.reference().starts_with(&prefix), "{}", a.reference());
        assert_eq!(a.reference().len(), prefix.len() + 8);
    }

    #[test]
    fn transfer_to_same_location_is_rejected() {
        let loc = LocationId::new();
        let wh = WarehouseId::new();
        let err = Document::draft(
            DocumentId::new(),
            None,
            DocumentTarget::Transfer {
                from_warehouse_id: wh,
                from_location_id: loc,
                to_warehouse_id: wh,
                to_location_id: loc,
            },
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn line_numbers_are_monotonic_after_removal() {
        let p = ProductId::new();
        let mut doc = with_line(with_line(receipt(), p, 5), ProductId::new(), 3);
        doc.remove_line(1, Utc::now()).unwrap();
        let n = doc
            .add_line(NewLine::new(p, qty(1), Uom::pieces()), Utc::now())
            .unwrap();
        assert_eq!(n, 3);
        assert!(doc.remove_line(99, Utc::now()).is_err());
    }

    #[test]
    fn lines_are_frozen_outside_draft() {
        let mut doc = with_line(receipt(), ProductId::new(), 5);
        doc.confirm(Utc::now()).unwrap();
        let err = doc
            .add_line(NewLine::new(ProductId::new(), qty(1), Uom::pieces()), Utc::now())
            .unwrap_err();
        match err {
            DomainError::DocumentNotEditable { status, .. } => assert_eq!(status, "waiting"),
            other => panic!("expected DocumentNotEditable, got {other:?}"),
        }
        assert!(doc.ensure_deletable().is_err());
    }

    #[test]
    fn zero_quantity_lines_only_allowed_on_adjustments() {
        let mut doc = receipt();
        assert!(
            doc.add_line(NewLine::new(ProductId::new(), qty(0), Uom::pieces()), Utc::now())
                .is_err()
        );

        let mut adj = Document::draft(
            DocumentId::new(),
            Some("ADJ-7".to_string()),
            DocumentTarget::Adjustment {
                warehouse_id: WarehouseId::new(),
                location_id: LocationId::new(),
            },
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(
            adj.add_line(NewLine::new(ProductId::new(), qty(0), Uom::pieces()), Utc::now())
                .is_ok()
        );
    }

    #[test]
    fn receive_requires_waiting_or_ready() {
        let mut doc = with_line(receipt(), ProductId::new(), 5);
        match doc.begin(MovementOperation::Receive).unwrap_err() {
            DomainError::InvalidTransition { from, action, .. } => {
                assert_eq!(from, "draft");
                assert_eq!(action, "receive");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        doc.confirm(Utc::now()).unwrap();
        assert!(doc.begin(MovementOperation::Receive).is_ok());
        doc.mark_ready(Utc::now()).unwrap();
        assert!(doc.begin(MovementOperation::Receive).is_ok());
    }

    #[test]
    fn wrong_operation_for_kind_is_a_validation_error() {
        let doc = with_line(receipt(), ProductId::new(), 5);
        let err = doc.begin(MovementOperation::ValidateDelivery).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn done_and_canceled_documents_reject_everything() {
        let mut doc = with_line(receipt(), ProductId::new(), 5);
        doc.confirm(Utc::now()).unwrap();
        doc.complete(Utc::now()).unwrap();
        assert!(doc.begin(MovementOperation::Receive).is_err());
        assert!(doc.cancel(Utc::now()).is_err());
        assert!(doc.complete(Utc::now()).is_err());

        let mut other = with_line(receipt(), ProductId::new(), 1);
        other.cancel(Utc::now()).unwrap();
        assert_eq!(other.status(), DocumentStatus::Canceled);
        assert!(other.confirm(Utc::now()).is_err());
    }

    #[test]
    fn record_applied_accumulates_and_tracks_variance() {
        let p = ProductId::new();
        let mut doc = with_line(receipt(), p, 10);
        doc.record_applied(p, qty(4)).unwrap();
        doc.record_applied(p, qty(3)).unwrap();
        let line = doc.line_for(p).unwrap();
        assert_eq!(line.applied, qty(7));
        assert_eq!(line.variance(), qty(-3));
        assert!(doc.record_applied(ProductId::new(), qty(1)).is_err());
    }

    #[test]
    fn record_count_updates_or_appends() {
        let p = ProductId::new();
        let mut adj = Document::draft(
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
        let first = adj.record_count(p, qty(20), qty(15), Some("damaged".into()), Uom::pieces());
        let again = adj.record_count(p, qty(20), qty(16), None, Uom::pieces());
        assert_eq!(first, again);
        let line = adj.line_for(p).unwrap();
        assert_eq!(line.difference(), Some(qty(-4)));
        assert_eq!(line.reason.as_deref(), Some("damaged"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in ["draft", "waiting", "ready", "done", "canceled"] {
            let status: DocumentStatus = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn target_serializes_with_its_kind_tag() {
        let target = DocumentTarget::Delivery {
            warehouse_id: WarehouseId::new(),
            customer: Some("Bolt Co".to_string()),
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["kind"], "delivery");
        assert_eq!(json["customer"], "Bolt Co");

        let back: DocumentTarget = serde_json::from_value(json).unwrap();
        assert_eq!(back, target);
    }

    #[test]
    fn fractional_quantities_accumulate_exactly() {
        use rust_decimal_macros::dec;

        let p = ProductId::new();
        let mut doc = receipt();
        doc.add_line(
            NewLine::new(p, Quantity::new(dec!(1.5)), Uom::new("kg").unwrap()),
            Utc::now(),
        )
        .unwrap();
        doc.record_applied(p, Quantity::new(dec!(0.1))).unwrap();
        doc.record_applied(p, Quantity::new(dec!(0.2))).unwrap();

        let line = doc.line_for(p).unwrap();
        assert_eq!(line.applied, Quantity::new(dec!(0.3)));
        assert_eq!(line.variance(), Quantity::new(dec!(-1.2)));
    }

    #[test]
    fn oversized_lines_and_applied_overflow_are_errors() {
        use rust_decimal::Decimal;

        let p = ProductId::new();
        let mut doc = receipt();
        let err = doc
            .add_line(NewLine::new(p, Quantity::new(Decimal::MAX), Uom::pieces()), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        doc.add_line(NewLine::new(p, Quantity::MAX, Uom::pieces()), Utc::now())
            .unwrap();
        doc.record_applied(p, Quantity::new(Decimal::MAX)).unwrap();
        let err = doc.record_applied(p, Quantity::from_i64(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(doc.line_for(p).unwrap().applied, Quantity::new(Decimal::MAX));
    }
}
