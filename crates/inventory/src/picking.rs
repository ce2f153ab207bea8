//! Delivery pick policy.
//!
//! A delivery line is served from exactly one location in the delivery's
//! warehouse: the one holding the most stock among those that can cover the
//! whole quantity, ties broken by the lowest location id. Split picks across
//! locations are not supported.

use serde::{Deserialize, Serialize};

use stockmaster_core::{DomainError, DomainResult, LocationId, ProductId, Quantity};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAtLocation {
    pub location_id: LocationId,
    pub quantity: Quantity,
}

impl StockAtLocation {
    pub fn new(location_id: LocationId, quantity: Quantity) -> Self {
        Self {
            location_id,
            quantity,
        }
    }
}

/// The location to pick `requested` from, or `None` if no single location
/// holds enough.
pub fn choose_pick_location(
    candidates: &[StockAtLocation],
    requested: Quantity,
) -> Option<LocationId> {
    candidates
        .iter()
        .filter(|c| c.quantity >= requested)
        .max_by(|a, b| {
            a.quantity
                .cmp(&b.quantity)
                .then_with(|| b.location_id.cmp(&a.location_id))
        })
        .map(|c| c.location_id)
}

/// Like [`choose_pick_location`] but reports `InsufficientStock` with the best
/// single-location quantity available.
pub fn pick_location(
    product_id: ProductId,
    candidates: &[StockAtLocation],
    requested: Quantity,
) -> DomainResult<LocationId> {
    choose_pick_location(candidates, requested).ok_or_else(|| {
        let best = candidates.iter().max_by_key(|c| c.quantity);
        DomainError::insufficient_stock(
            product_id,
            None,
            best.map(|c| c.quantity).unwrap_or(Quantity::ZERO),
            requested,
        )
    })
}
