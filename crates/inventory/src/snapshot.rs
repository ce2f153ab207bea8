//! Current-quantity snapshot per (product, location).
//!
//! The snapshot is a materialized cache of the movement ledger: its quantity
//! always equals the signed sum of the entries touching the same pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockmaster_core::{DomainError, DomainResult, LocationId, ProductId, Quantity, Uom, WarehouseId};

/// Snapshot key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub product_id: ProductId,
    pub location_id: LocationId,
}

impl SnapshotKey {
    pub fn new(product_id: ProductId, location_id: LocationId) -> Self {
        Self {
            product_id,
            location_id,
        }
    }
}

/// Whether a decrement may take a snapshot below zero.
///
/// Only compensating/correction paths use `Allow`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum NegativeStock {
    #[default]
    Reject,
    Allow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: LocationId,
    pub quantity: Quantity,
    pub uom: Uom,
    pub updated_at: DateTime<Utc>,
}

impl StockSnapshot {
    /// An empty row, created lazily on the first movement into a location.
    pub fn empty(
        key: SnapshotKey,
        warehouse_id: WarehouseId,
        uom: Uom,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id,
            location_id: key.location_id,
            quantity: Quantity::ZERO,
            uom,
            updated_at: now,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.product_id, self.location_id)
    }

    /// Apply a signed delta and return the new quantity.
    ///
    /// Leaves the snapshot untouched on `InsufficientStock` or overflow.
    pub fn apply_delta(
        &mut self,
        delta: Quantity,
        negative: NegativeStock,
        now: DateTime<Utc>,
    ) -> DomainResult<Quantity> {
        let next = self.quantity.checked_add(delta)?;
        if next.is_negative() && negative == NegativeStock::Reject {
            return Err(DomainError::insufficient_stock(
                self.product_id,
                Some(self.location_id),
                self.quantity,
                -delta,
            ));
        }
        self.quantity = next;
        self.updated_at = now;
        Ok(next)
    }
}
