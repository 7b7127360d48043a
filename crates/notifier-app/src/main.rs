//! Entry point for the notifier: drains the order-event topic and logs
//! every status transition, alongside a small `/health`+`/metrics` surface.

use anyhow::{Context, Result};
use app_config::NotifierConfig;
use axum::{routing::get, Router};
use kafka_consumer::{KafkaConsumer, LogSink, NotificationHandler};
use model::OrderEvent;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("NOTIFIER_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NotifierConfig::load().context("failed to load notifier configuration")?;

    let registry = Registry::new();
    let events_consumed_total = IntCounter::new("events_consumed_total", "total number of order events consumed")
        .expect("failed to create events_consumed_total metric");
    registry
        .register(Box::new(events_consumed_total.clone()))
        .expect("failed to register events_consumed_total metric");

    let handler = Arc::new(CountingSink {
        inner: LogSink,
        events_consumed_total: events_consumed_total.clone(),
    });
    let consumer = KafkaConsumer::new(
        &config.kafka_brokers,
        &config.kafka_topic,
        &config.kafka_group_id,
        handler,
    )
    .context("failed to initialize Kafka consumer")?;

    let shutdown = Arc::new(Notify::new());

    let consumer_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { consumer.run(shutdown).await })
    };

    let http_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { serve_http(config.http_port, registry, shutdown).await })
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    shutdown.notify_waiters();

    consumer_handle
        .await
        .context("consumer task panicked")?
        .context("consumer loop failed")?;
    http_handle
        .await
        .context("http task panicked")?
        .context("http server failed")?;

    info!("notifier shut down gracefully");
    Ok(())
}

/// Wraps the log sink with the `events_consumed_total` counter so every
/// dispatched event is both logged and counted.
struct CountingSink {
    inner: LogSink,
    events_consumed_total: IntCounter,
}

impl NotificationHandler for CountingSink {
    fn handle(&self, event: &OrderEvent) {
        self.inner.handle(event);
        self.events_consumed_total.inc();
    }
}

async fn serve_http(port: u16, registry: Registry, shutdown: Arc<Notify>) -> Result<()> {
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(move || handle_metrics(registry.clone())));

    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .context("failed to bind notifier HTTP port")?;

    info!(port, "notifier HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.notified().await })
        .await
        .context("notifier HTTP server error")
}

async fn handle_metrics(registry: Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .expect("failed to encode metrics");
    String::from_utf8(buffer).expect("metrics buffer was not valid utf-8")
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
