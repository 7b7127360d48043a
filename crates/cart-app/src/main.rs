//! Entry point for the Cart service: owns the in-memory cart store, the
//! catalog and LOMS clients, and the HTTP API surface in front of them.

use anyhow::{Context, Result};
use app_config::CartConfig;
use cart_http::Server;
use cart_service::CartServiceImpl;
use cart_store::CartStore;
use catalog_client::CatalogClient;
use loms_client::LomsClient;
use prometheus::IntGauge;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("CART_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CartConfig::load().context("failed to load cart configuration")?;
    info!(port = config.http_port, "starting cart service");

    let store = CartStore::new();
    let catalog = Arc::new(CatalogClient::new(
        config.catalog_base_url.clone(),
        std::env::var("CART_CATALOG_API_KEY").unwrap_or_default(),
        config.call_timeout,
        config.catalog_rate_limit,
        config.catalog_rate_burst,
        config.catalog_retry_max,
    )?);
    let loms = LomsClient::connect(config.loms_addr.clone(), config.call_timeout)
        .await
        .context("failed to connect to LOMS")?;

    let cart_service = Arc::new(CartServiceImpl::new(store.clone(), catalog, loms, config.enrichment_workers));

    let server = Server::new(config.http_port.to_string(), cart_service);
    spawn_cart_size_gauge(server.registry(), store);

    server.start().await
}

/// Periodically samples the cart store's total item count into a gauge.
/// Never fails the service: a sample error just skips that tick.
fn spawn_cart_size_gauge(registry: prometheus::Registry, store: CartStore) {
    let gauge = IntGauge::new("cart_items_count", "total number of items across all carts")
        .expect("failed to create cart_items_count metric");

    if let Err(e) = registry.register(Box::new(gauge.clone())) {
        error!(%e, "failed to register cart_items_count metric");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        loop {
            ticker.tick().await;
            gauge.set(i64::from(store.get_count_items().await));
        }
    });
}
