//! Low-stock signal payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockmaster_core::{ProductId, Quantity, WarehouseId};
use stockmaster_events::Event;

use crate::catalog::Product;

/// Emitted when a product's warehouse total drops below its reorder threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub warehouse_id: WarehouseId,
    pub current: Quantity,
    pub threshold: Quantity,
    pub occurred_at: DateTime<Utc>,
}

impl LowStockAlert {
    /// `Some` when `total` is below the product's threshold.
    pub fn evaluate(
        product: &Product,
        warehouse_id: WarehouseId,
        total: Quantity,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let threshold = product.reorder_threshold()?;
        if total >= threshold {
            return None;
        }
        Some(Self {
            product_id: product.id_typed(),
            sku: product.sku().to_string(),
            name: product.name().to_string(),
            warehouse_id,
            current: total,
            threshold,
            occurred_at: now,
        })
    }
}

impl Event for LowStockAlert {
    fn event_type(&self) -> &'static str {
        "stock.low_stock.detected"
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
