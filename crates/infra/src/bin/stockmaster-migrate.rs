//! Applies the stock schema to the database named by `DATABASE_URL`.

use stockmaster_infra::{StockConfig, connect_store};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    stockmaster_observability::init();

    let config = StockConfig {
        use_persistent_stores: true,
        ..StockConfig::from_env()?
    };
    connect_store(&config).await?;

    tracing::info!("stock schema is up to date");
    Ok(())
}
