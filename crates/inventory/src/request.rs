//! Inputs to the movement operations.
//!
//! Request lines are validated before any store access: a malformed request
//! never opens a transaction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockmaster_core::{DocumentId, DomainError, DomainResult, ProductId, Quantity, Uom, UserId};

/// Caller-chosen key that makes a movement call safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const MAX_LEN: usize = 128;

    pub fn new(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("idempotency key cannot be empty"));
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "idempotency key longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Common surface of the per-operation line types.
pub trait RequestLine {
    /// Whether an empty line list is meaningful (apply the document as entered).
    const MAY_BE_EMPTY: bool;
    /// Whether the same product may appear on more than one line.
    const ALLOWS_REPEATED_PRODUCTS: bool;

    fn product_id(&self) -> ProductId;

    fn validate(&self) -> DomainResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub product_id: ProductId,
    pub qty_received: Quantity,
    pub uom: Option<Uom>,
}

impl ReceiveLine {
    pub fn new(product_id: ProductId, qty_received: Quantity) -> Self {
        Self {
            product_id,
            qty_received,
            uom: None,
        }
    }
}

impl RequestLine for ReceiveLine {
    const MAY_BE_EMPTY: bool = false;
    const ALLOWS_REPEATED_PRODUCTS: bool = true;

    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn validate(&self) -> DomainResult<()> {
        self.qty_received.ensure_positive("qty_received")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickLine {
    pub product_id: ProductId,
    pub qty_picked: Quantity,
}

impl PickLine {
    pub fn new(product_id: ProductId, qty_picked: Quantity) -> Self {
        Self {
            product_id,
            qty_picked,
        }
    }
}

impl RequestLine for PickLine {
    const MAY_BE_EMPTY: bool = true;
    const ALLOWS_REPEATED_PRODUCTS: bool = false;

    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn validate(&self) -> DomainResult<()> {
        self.qty_picked.ensure_positive("qty_picked")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub product_id: ProductId,
    pub qty_received: Quantity,
}

impl TransferLine {
    pub fn new(product_id: ProductId, qty_received: Quantity) -> Self {
        Self {
            product_id,
            qty_received,
        }
    }
}

impl RequestLine for TransferLine {
    const MAY_BE_EMPTY: bool = true;
    const ALLOWS_REPEATED_PRODUCTS: bool = false;

    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn validate(&self) -> DomainResult<()> {
        self.qty_received.ensure_positive("qty_received")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub product_id: ProductId,
    pub qty_counted: Quantity,
    pub reason: Option<String>,
    pub uom: Option<Uom>,
}

impl CountLine {
    pub fn new(product_id: ProductId, qty_counted: Quantity) -> Self {
        Self {
            product_id,
            qty_counted,
            reason: None,
            uom: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl RequestLine for CountLine {
    const MAY_BE_EMPTY: bool = false;
    const ALLOWS_REPEATED_PRODUCTS: bool = false;

    fn product_id(&self) -> ProductId {
        self.product_id
    }

    fn validate(&self) -> DomainResult<()> {
        self.qty_counted.ensure_non_negative("qty_counted")?;
        Ok(())
    }
}

/// One call to a movement operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest<L> {
    pub document_id: DocumentId,
    pub lines: Vec<L>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub actor: Option<UserId>,
}

impl<L: RequestLine> MovementRequest<L> {
    pub fn new(document_id: DocumentId, lines: Vec<L>) -> Self {
        Self {
            document_id,
            lines,
            idempotency_key: None,
            actor: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    pub fn by(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.lines.is_empty() && !L::MAY_BE_EMPTY {
            return Err(DomainError::validation("no lines to apply"));
        }
        let mut seen = HashSet::new();
        for line in &self.lines {
            line.validate()?;
            if !seen.insert(line.product_id()) && !L::ALLOWS_REPEATED_PRODUCTS {
                return Err(DomainError::validation(format!(
                    "product {} appears on more than one line",
                    line.product_id()
                )));
            }
        }
        Ok(())
    }

    /// The request line for `product_id`, if any.
    pub fn line_for(&self, product_id: ProductId) -> Option<&L> {
        self.lines.iter().find(|l| l.product_id() == product_id)
    }
}
