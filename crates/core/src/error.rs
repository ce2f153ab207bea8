//! Domain error model.

use thiserror::Error;

use crate::id::{LocationId, ProductId};
use crate::quantity::Quantity;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// document state, stock consistency). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (missing/zero quantity, malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced product, location, warehouse or document does not exist.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// A decrement would take stock below zero.
    ///
    /// `location` is `None` when no single location could satisfy the request.
    #[error("insufficient stock for product {product} (available: {available}, requested: {requested})")]
    InsufficientStock {
        product: ProductId,
        location: Option<LocationId>,
        available: Quantity,
        requested: Quantity,
    },

    /// A mutation was attempted on a document that is no longer a draft.
    #[error("document {reference} is not editable in status '{status}'")]
    DocumentNotEditable { reference: String, status: String },

    /// The document's status does not permit the requested operation.
    #[error("document {reference} cannot {action} from status '{from}'")]
    InvalidTransition {
        reference: String,
        from: String,
        action: String,
    },

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::ReferenceNotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(
        product: ProductId,
        location: Option<LocationId>,
        available: Quantity,
        requested: Quantity,
    ) -> Self {
        Self::InsufficientStock {
            product,
            location,
            available,
            requested,
        }
    }

    pub fn not_editable(reference: impl Into<String>, status: impl Into<String>) -> Self {
        Self::DocumentNotEditable {
            reference: reference.into(),
            status: status.into(),
        }
    }

    pub fn invalid_transition(
        reference: impl Into<String>,
        from: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            reference: reference.into(),
            from: from.into(),
            action: action.into(),
        }
    }
}
