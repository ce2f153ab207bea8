//! Low-stock notification: the best-effort side effect of decrementing operations.
//!
//! The signal runs after the stock transaction has committed. Whatever the
//! notifier does (fail, hang, panic-free error), the movement operation has
//! already succeeded and its result is returned unchanged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use stockmaster_core::WarehouseId;
use stockmaster_events::{EventBus, EventEnvelope};
use stockmaster_inventory::{LowStockAlert, Product};

use crate::store::StockStore;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Notification collaborator. The transport (email, webhook, bus) is the
/// implementor's business.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError>;
}

#[async_trait::async_trait]
impl<N> Notifier for Arc<N>
where
    N: Notifier + ?Sized,
{
    async fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        (**self).notify(alert).await
    }
}

/// Publishes alerts onto an event bus as enveloped events.
pub struct BusNotifier<B> {
    bus: B,
}

impl<B> BusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

#[async_trait::async_trait]
impl<B> Notifier for BusNotifier<B>
where
    B: EventBus<EventEnvelope<LowStockAlert>>,
{
    async fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        self.bus
            .publish(EventEnvelope::wrap(alert.clone()))
            .map_err(|err| NotifyError::Transport(format!("{err:?}")))
    }
}

/// Writes alerts to the log. Default collaborator when nothing else is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(alert)
            .map_err(|e| NotifyError::Transport(format!("failed to encode alert: {e}")))?;
        info!(
            product_id = %alert.product_id,
            warehouse_id = %alert.warehouse_id,
            alert = %payload,
            "low stock"
        );
        Ok(())
    }
}

/// `check_and_notify`: compare a warehouse total against the product's
/// reorder threshold and tell the notifier when it is below.
pub struct LowStockSignal<N> {
    notifier: N,
    timeout: Duration,
}

impl<N: Notifier> LowStockSignal<N> {
    pub fn new(notifier: N, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Returns the alert that was delivered, if any. Never fails: read errors,
    /// notifier errors and timeouts are logged and swallowed.
    pub async fn check_and_notify<S>(
        &self,
        store: &S,
        product: &Product,
        warehouse_id: WarehouseId,
    ) -> Option<LowStockAlert>
    where
        S: StockStore + ?Sized,
    {
        product.reorder_threshold()?;

        let total = match store
            .warehouse_total(product.id_typed(), warehouse_id)
            .await
        {
            Ok(total) => total,
            Err(err) => {
                warn!(
                    product_id = %product.id_typed(),
                    warehouse_id = %warehouse_id,
                    error = %err,
                    "low-stock check could not read warehouse total"
                );
                return None;
            }
        };

        let alert = LowStockAlert::evaluate(product, warehouse_id, total, Utc::now())?;
        debug!(
            product_id = %alert.product_id,
            current = %alert.current,
            threshold = %alert.threshold,
            "stock below reorder threshold"
        );

        match tokio::time::timeout(self.timeout, self.notifier.notify(&alert)).await {
            Ok(Ok(())) => Some(alert),
            Ok(Err(err)) => {
                warn!(
                    product_id = %alert.product_id,
                    warehouse_id = %warehouse_id,
                    error = %err,
                    "low-stock notification failed"
                );
                None
            }
            Err(_) => {
                warn!(
                    product_id = %alert.product_id,
                    warehouse_id = %warehouse_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "low-stock notification timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockmaster_core::{LocationId, ProductId, Quantity, Uom};
    use stockmaster_events::InMemoryEventBus;
    use stockmaster_inventory::{NegativeStock, SnapshotKey};

    use crate::store::InMemoryStockStore;

    struct Hanging;

    #[async_trait::async_trait]
    impl Notifier for Hanging {
        async fn notify(&self, _alert: &LowStockAlert) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    async fn store_with(qty: i64) -> (InMemoryStockStore, Product, WarehouseId) {
        let store = InMemoryStockStore::new();
        let product = Product::new(ProductId::new(), "SKU-1", "Widget", Uom::pieces())
            .unwrap()
            .with_reorder_threshold(Quantity::from_i64(10))
            .unwrap();
        let wh = WarehouseId::new();
        let mut tx = store.begin().await.unwrap();
        tx.apply_delta(
            SnapshotKey::new(product.id_typed(), LocationId::new()),
            wh,
            Quantity::from_i64(qty),
            &Uom::pieces(),
            NegativeStock::Reject,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        (store, product, wh)
    }

    #[tokio::test]
    async fn publishes_alert_on_the_bus_when_below_threshold() {
        let (store, product, wh) = store_with(4).await;
        let bus: Arc<InMemoryEventBus<EventEnvelope<LowStockAlert>>> =
            Arc::new(InMemoryEventBus::new());
        let sub = bus.subscribe();
        let signal = LowStockSignal::new(BusNotifier::new(bus), Duration::from_secs(1));

        let alert = signal.check_and_notify(&store, &product, wh).await.unwrap();
        assert_eq!(alert.current, Quantity::from_i64(4));

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type(), "stock.low_stock.detected");
        assert_eq!(published[0].payload().warehouse_id, wh);
    }

    #[tokio::test]
    async fn at_or_above_threshold_is_silent() {
        let (store, product, wh) = store_with(10).await;
        let signal = LowStockSignal::new(LoggingNotifier, Duration::from_secs(1));
        assert!(signal.check_and_notify(&store, &product, wh).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_notifier_is_abandoned_after_timeout() {
        let (store, product, wh) = store_with(1).await;
        let signal = LowStockSignal::new(Hanging, Duration::from_millis(50));
        assert!(signal.check_and_notify(&store, &product, wh).await.is_none());
    }
}
