//! Configuration loading and store wiring.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `USE_PERSISTENT_STORES` | `false` (in-memory store) |
//! | `DATABASE_URL` | required when persistent |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `STOCKMASTER_TRANSFER_VARIANCE` | `preserve_committed` |
//! | `STOCKMASTER_NOTIFY_TIMEOUT_MS` | `2000` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use sqlx::postgres::PgPoolOptions;
use stockmaster_inventory::TransferVariancePolicy;

use crate::movement_engine::EngineConfig;
use crate::store::{InMemoryStockStore, PostgresStockStore, StockStore};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub transfer_variance: TransferVariancePolicy,
    pub notify_timeout: Duration,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            transfer_variance: TransferVariancePolicy::default(),
            notify_timeout: Duration::from_millis(DEFAULT_NOTIFY_TIMEOUT_MS),
        }
    }
}

impl StockConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Unparseable optional values
    /// fall back to their default with a warning; a persistent store without
    /// `DATABASE_URL` is an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let use_persistent_stores = parse_or(
            &lookup,
            "USE_PERSISTENT_STORES",
            defaults.use_persistent_stores,
        );
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true");
        }

        let database_max_connections = parse_or(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database_max_connections,
        );
        let transfer_variance = parse_or(
            &lookup,
            "STOCKMASTER_TRANSFER_VARIANCE",
            defaults.transfer_variance,
        );
        let notify_timeout_ms = parse_or(
            &lookup,
            "STOCKMASTER_NOTIFY_TIMEOUT_MS",
            DEFAULT_NOTIFY_TIMEOUT_MS,
        );

        Ok(Self {
            use_persistent_stores,
            database_url,
            database_max_connections,
            transfer_variance,
            notify_timeout: Duration::from_millis(notify_timeout_ms),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            transfer_variance: self.transfer_variance,
            notify_timeout: self.notify_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Debug,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                variable = name,
                value = %raw,
                fallback = ?default,
                "invalid configuration value, using default"
            );
            default
        }
    }
}

/// Build the configured store. The Postgres path connects and applies the
/// schema before returning.
pub async fn connect_store(config: &StockConfig) -> anyhow::Result<Arc<dyn StockStore>> {
    if !config.use_persistent_stores {
        tracing::info!("using in-memory stock store");
        return Ok(Arc::new(InMemoryStockStore::new()));
    }

    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    let store = PostgresStockStore::new(pool);
    store
        .migrate()
        .await
        .context("failed to apply stock schema")?;

    tracing::info!(
        max_connections = config.database_max_connections,
        "using Postgres stock store"
    );
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = StockConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StockConfig::default());
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn values_are_read() {
        let config = StockConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
            ("STOCKMASTER_TRANSFER_VARIANCE", "follow_received"),
            ("STOCKMASTER_NOTIFY_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert!(config.use_persistent_stores);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(config.database_max_connections, 4);
        assert_eq!(config.transfer_variance, TransferVariancePolicy::FollowReceived);
        assert_eq!(config.notify_timeout, Duration::from_millis(250));
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let config = StockConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "maybe"),
            ("DATABASE_MAX_CONNECTIONS", "-1"),
            ("STOCKMASTER_TRANSFER_VARIANCE", "split_the_difference"),
        ]))
        .unwrap();
        assert_eq!(config, StockConfig::default());
    }

    #[test]
    fn persistent_store_requires_a_database_url() {
        let err = StockConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "true")]))
            .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[tokio::test]
    async fn in_memory_store_is_the_default() {
        let store = connect_store(&StockConfig::default()).await.unwrap();
        let total = store
            .warehouse_total(
                stockmaster_core::ProductId::new(),
                stockmaster_core::WarehouseId::new(),
            )
            .await
            .unwrap();
        assert!(total.is_zero());
    }
}
