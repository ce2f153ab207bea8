//! Movement ledger entries.
//!
//! Entries are write-once. A mistake is never retracted; it is superseded by a
//! compensating entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockmaster_core::{
    DomainError, DomainResult, LocationId, MovementId, ProductId, Quantity, Uom, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Receipt,
    Delivery,
    Internal,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Delivery => "delivery",
            MovementType::Internal => "internal",
            MovementType::Adjustment => "adjustment",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(MovementType::Receipt),
            "delivery" => Ok(MovementType::Delivery),
            "internal" => Ok(MovementType::Internal),
            "adjustment" => Ok(MovementType::Adjustment),
            other => Err(DomainError::validation(format!(
                "unknown movement type '{other}'"
            ))),
        }
    }
}

/// Ledger entries are always `done` once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    #[default]
    Done,
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        "done"
    }
}

/// A movement about to be appended (not yet assigned an id or timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub reference: String,
    pub product_id: ProductId,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub quantity: Quantity,
    pub uom: Uom,
    pub created_by: Option<UserId>,
}

impl NewMovement {
    /// Goods arriving into `to`.
    pub fn receipt(
        reference: impl Into<String>,
        product_id: ProductId,
        to: LocationId,
        quantity: Quantity,
        uom: Uom,
    ) -> DomainResult<Self> {
        Self::build(
            MovementType::Receipt,
            reference,
            product_id,
            None,
            Some(to),
            quantity,
            uom,
        )
    }

    /// Goods leaving from `from`.
    pub fn delivery(
        reference: impl Into<String>,
        product_id: ProductId,
        from: LocationId,
        quantity: Quantity,
        uom: Uom,
    ) -> DomainResult<Self> {
        Self::build(
            MovementType::Delivery,
            reference,
            product_id,
            Some(from),
            None,
            quantity,
            uom,
        )
    }

    /// Goods moving between two locations.
    pub fn internal(
        reference: impl Into<String>,
        product_id: ProductId,
        from: LocationId,
        to: LocationId,
        quantity: Quantity,
        uom: Uom,
    ) -> DomainResult<Self> {
        if from == to {
            return Err(DomainError::validation(
                "internal movement requires distinct locations",
            ));
        }
        Self::build(
            MovementType::Internal,
            reference,
            product_id,
            Some(from),
            Some(to),
            quantity,
            uom,
        )
    }

    /// Count correction at `location`.
    ///
    /// A positive `difference` lands on the increase side (`to`), a negative one
    /// on the decrease side (`from`), with magnitude `|difference|`. Returns
    /// `None` for a zero difference: nothing moved.
    pub fn adjustment(
        reference: impl Into<String>,
        product_id: ProductId,
        location: LocationId,
        difference: Quantity,
        uom: Uom,
    ) -> DomainResult<Option<Self>> {
        if difference.is_zero() {
            return Ok(None);
        }
        let (from, to) = if difference.is_negative() {
            (Some(location), None)
        } else {
            (None, Some(location))
        };
        Self::build(
            MovementType::Adjustment,
            reference,
            product_id,
            from,
            to,
            difference.abs(),
            uom,
        )
        .map(Some)
    }

    fn build(
        movement_type: MovementType,
        reference: impl Into<String>,
        product_id: ProductId,
        from_location: Option<LocationId>,
        to_location: Option<LocationId>,
        quantity: Quantity,
        uom: Uom,
    ) -> DomainResult<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(DomainError::validation("movement reference cannot be empty"));
        }
        quantity.ensure_positive("movement quantity")?;
        Ok(Self {
            movement_type,
            reference,
            product_id,
            from_location,
            to_location,
            quantity,
            uom,
            created_by: None,
        })
    }

    pub fn by(mut self, actor: Option<UserId>) -> Self {
        self.created_by = actor;
        self
    }

    /// Signed effect of this movement on `location`.
    pub fn delta_at(&self, location: LocationId) -> Quantity {
        delta_at(self.from_location, self.to_location, self.quantity, location)
    }

    /// Assign identity and time (done by the store on append).
    pub fn commit(self, id: MovementId, created_at: DateTime<Utc>) -> MovementEntry {
        MovementEntry {
            id,
            movement_type: self.movement_type,
            reference: self.reference,
            product_id: self.product_id,
            from_location: self.from_location,
            to_location: self.to_location,
            quantity: self.quantity,
            uom: self.uom,
            status: MovementStatus::Done,
            created_by: self.created_by,
            created_at,
        }
    }
}

/// An appended, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub id: MovementId,
    pub movement_type: MovementType,
    pub reference: String,
    pub product_id: ProductId,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub quantity: Quantity,
    pub uom: Uom,
    pub status: MovementStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl MovementEntry {
    pub fn delta_at(&self, location: LocationId) -> Quantity {
        delta_at(self.from_location, self.to_location, self.quantity, location)
    }

    /// Signed ledger balance for one (product, location) pair.
    pub fn balance<'a>(
        entries: impl IntoIterator<Item = &'a MovementEntry>,
        product_id: ProductId,
        location: LocationId,
    ) -> Quantity {
        entries
            .into_iter()
            .filter(|e| e.product_id == product_id)
            .map(|e| e.delta_at(location))
            .sum()
    }
}

fn delta_at(
    from: Option<LocationId>,
    to: Option<LocationId>,
    quantity: Quantity,
    location: LocationId,
) -> Quantity {
    let mut delta = Quantity::ZERO;
    if from == Some(location) {
        delta -= quantity;
    }
    if to == Some(location) {
        delta += quantity;
    }
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(n: i64) -> Quantity {
        Quantity::from_i64(n)
    }

    #[test]
    fn receipt_and_delivery_set_exactly_one_side() {
        let loc = LocationId::new();
        let p = ProductId::new();
        let r = NewMovement::receipt("REC-1", p, loc, qty(5), Uom::pieces()).unwrap();
        assert_eq!((r.from_location, r.to_location), (None, Some(loc)));
        let d = NewMovement::delivery("DEL-1", p, loc, qty(5), Uom::pieces()).unwrap();
        assert_eq!((d.from_location, d.to_location), (Some(loc), None));
    }

    #[test]
    fn adjustment_side_follows_sign() {
        let loc = LocationId::new();
        let p = ProductId::new();
        let down = NewMovement::adjustment("ADJ-1", p, loc, qty(-5), Uom::pieces())
            .unwrap()
            .unwrap();
        assert_eq!(down.from_location, Some(loc));
        assert_eq!(down.to_location, None);
        assert_eq!(down.quantity, qty(5));

        let up = NewMovement::adjustment("ADJ-1", p, loc, qty(3), Uom::pieces())
            .unwrap()
            .unwrap();
        assert_eq!(up.to_location, Some(loc));
        assert!(
            NewMovement::adjustment("ADJ-1", p, loc, Quantity::ZERO, Uom::pieces())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn zero_or_negative_quantities_are_rejected() {
        let loc = LocationId::new();
        assert!(NewMovement::receipt("REC-1", ProductId::new(), loc, qty(0), Uom::pieces()).is_err());
        assert!(NewMovement::delivery("DEL-1", ProductId::new(), loc, qty(-2), Uom::pieces()).is_err());
    }

    #[test]
    fn internal_requires_distinct_locations() {
        let loc = LocationId::new();
        let err = NewMovement::internal("TRF-1", ProductId::new(), loc, loc, qty(1), Uom::pieces())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn balance_is_signed_sum_per_location() {
        let (a, b) = (LocationId::new(), LocationId::new());
        let p = ProductId::new();
        let now = Utc::now();
        let entries = vec![
            NewMovement::receipt("REC-1", p, a, qty(50), Uom::pieces())
                .unwrap()
                .commit(MovementId::new(), now),
            NewMovement::delivery("DEL-1", p, a, qty(30), Uom::pieces())
                .unwrap()
                .commit(MovementId::new(), now),
            NewMovement::internal("TRF-1", p, a, b, qty(20), Uom::pieces())
                .unwrap()
                .commit(MovementId::new(), now),
        ];
        assert_eq!(MovementEntry::balance(&entries, p, a), Quantity::ZERO);
        assert_eq!(MovementEntry::balance(&entries, p, b), qty(20));
        assert_eq!(MovementEntry::balance(&entries, ProductId::new(), b), Quantity::ZERO);
    }
}
