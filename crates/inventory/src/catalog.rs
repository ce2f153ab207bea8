//! Catalog records referenced by every movement: products, warehouses and
//! locations.

use serde::{Deserialize, Serialize};

use stockmaster_core::{
    DomainError, DomainResult, Entity, LocationId, ProductId, Quantity, Uom, WarehouseId,
};

/// A stocked product.
///
/// Identity, SKU and unit are fixed once the product appears in the ledger;
/// only the name and reorder threshold may change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    sku: String,
    name: String,
    uom: Uom,
    reorder_threshold: Option<Quantity>,
}

impl Product {
    pub fn new(
        id: ProductId,
        sku: impl Into<String>,
        name: impl Into<String>,
        uom: Uom,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(Self {
            id,
            sku: sku.trim().to_string(),
            name: name.trim().to_string(),
            uom,
            reorder_threshold: None,
        })
    }

    pub fn with_reorder_threshold(mut self, threshold: Quantity) -> DomainResult<Self> {
        self.set_reorder_threshold(Some(threshold))?;
        Ok(self)
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uom(&self) -> &Uom {
        &self.uom
    }

    pub fn reorder_threshold(&self) -> Option<Quantity> {
        self.reorder_threshold
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        self.name = name.trim().to_string();
        Ok(())
    }

    pub fn set_reorder_threshold(&mut self, threshold: Option<Quantity>) -> DomainResult<()> {
        if let Some(t) = threshold {
            t.ensure_non_negative("reorder threshold")?;
        }
        self.reorder_threshold = threshold;
        Ok(())
    }

    /// True when `total` is strictly below the configured reorder threshold.
    /// Products without a threshold are never low on stock.
    pub fn is_below_threshold(&self, total: Quantity) -> bool {
        self.reorder_threshold.is_some_and(|t| total < t)
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A warehouse: the scope for low-stock totals and delivery picking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
}

impl Warehouse {
    pub fn new(
        id: WarehouseId,
        code: impl Into<String>,
        name: impl Into<String>,
    ) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("warehouse code cannot be empty"));
        }
        Ok(Self {
            id,
            code: code.trim().to_string(),
            name: name.into(),
        })
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A location inside a warehouse. Purely a grouping key for stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub warehouse_id: WarehouseId,
    pub name: String,
    pub capacity: Option<Quantity>,
    pub uom: Option<Uom>,
}

impl Location {
    pub fn new(id: LocationId, warehouse_id: WarehouseId, name: impl Into<String>) -> Self {
        Self {
            id,
            warehouse_id,
            name: name.into(),
            capacity: None,
            uom: None,
        }
    }

    pub fn with_capacity(mut self, capacity: Quantity, uom: Option<Uom>) -> Self {
        self.capacity = Some(capacity);
        self.uom = uom;
        self
    }

    /// Fails with `Validation` when the location is not part of `warehouse_id`.
    pub fn ensure_in(&self, warehouse_id: WarehouseId) -> DomainResult<()> {
        if self.warehouse_id != warehouse_id {
            return Err(DomainError::validation(format!(
                "location {} does not belong to warehouse {}",
                self.id, warehouse_id
            )));
        }
        Ok(())
    }
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product::new(ProductId::new(), " SKU-1 ", "Widget", Uom::pieces()).unwrap()
    }

    #[test]
    fn new_product_trims_and_validates() {
        let p = product();
        assert_eq!(p.sku(), "SKU-1");
        assert!(Product::new(ProductId::new(), "", "x", Uom::pieces()).is_err());
    }

    #[test]
    fn threshold_is_strict_lower_bound() {
        let p = product()
            .with_reorder_threshold(Quantity::from_i64(10))
            .unwrap();
        assert!(p.is_below_threshold(Quantity::from_i64(9)));
        assert!(!p.is_below_threshold(Quantity::from_i64(10)));
        assert!(!product().is_below_threshold(Quantity::from_i64(-5)));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut p = product();
        assert!(p.set_reorder_threshold(Some(Quantity::from_i64(-1))).is_err());
        assert_eq!(p.reorder_threshold(), None);
    }

    #[test]
    fn location_membership_check() {
        let wh = WarehouseId::new();
        let loc = Location::new(LocationId::new(), wh, "A-01");
        assert!(loc.ensure_in(wh).is_ok());
        assert!(loc.ensure_in(WarehouseId::new()).is_err());
    }
}
