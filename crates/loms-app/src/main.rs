//! Entry point for LOMS: gRPC API, outbox dispatcher, and the orphan-order
//! sweeper, all sharing one connection pool.

use anyhow::{Context, Result};
use app_config::LomsConfig;
use loms_grpc::LomsGrpcService;
use loms_proto::v1::orders_server::OrdersServer;
use loms_proto::v1::stocks_server::StocksServer;
use repository::{PgOrderRepository, PgOutboxRepository, PgStockRepository};
use service::order::OrderServiceImpl;
use service::stock::StockServiceImpl;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOMS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = LomsConfig::load().context("failed to load loms configuration")?;
    let pool = db::init_db_pool(&config.db()).await.context("failed to initialize database pool")?;

    let order_service = Arc::new(OrderServiceImpl::new(
        pool.clone(),
        config.kafka_topic.clone(),
        PgOrderRepository::new(pool.clone()),
        PgOutboxRepository::new(),
        PgStockRepository::new(pool.clone()),
    ));
    let stock_service = Arc::new(StockServiceImpl::new(PgStockRepository::new(pool.clone())));
    let grpc_service = LomsGrpcService::new(order_service.clone(), stock_service);

    let grpc_addr = format!("0.0.0.0:{}", config.grpc_port).parse()?;
    let grpc_handle = tokio::spawn(run_grpc_server(grpc_addr, grpc_service));

    let dispatcher_handle = tokio::spawn(run_outbox_dispatcher(
        pool.clone(),
        config.kafka_brokers.clone(),
        config.dispatch_interval,
        config.dispatch_batch_size,
    ));

    let sweeper_handle = tokio::spawn(run_orphan_sweeper(
        order_service,
        config.orphan_sweep_interval,
        config.orphan_ttl,
    ));

    tokio::select! {
        res = grpc_handle => res.context("grpc server task panicked")??,
        res = dispatcher_handle => res.context("outbox dispatcher task panicked")??,
        res = sweeper_handle => res.context("orphan sweeper task panicked")??,
    }

    Ok(())
}

async fn run_grpc_server<R1, R2, R3>(
    addr: std::net::SocketAddr,
    grpc_service: LomsGrpcService<R1, R2, R3>,
) -> Result<()>
where
    R1: repository::OrderRepository + Send + Sync + 'static,
    R2: repository::OutboxRepository + Send + Sync + 'static,
    R3: repository::StockRepository + Send + Sync + 'static,
{
    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter.set_serving::<OrdersServer<LomsGrpcService<R1, R2, R3>>>().await;

    info!(%addr, "LOMS gRPC server listening");

    let builder = Server::builder()
        .add_service(health_service)
        .add_service(OrdersServer::new(grpc_service.clone()))
        .add_service(StocksServer::new(grpc_service));

    #[cfg(debug_assertions)]
    let builder = {
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(loms_proto::FILE_DESCRIPTOR_SET)
            .build_v1()
            .context("failed to build gRPC reflection service")?;
        builder.add_service(reflection_service)
    };

    builder.serve(addr).await.context("grpc server error")
}

async fn run_outbox_dispatcher(
    pool: deadpool_postgres::Pool,
    kafka_brokers: Vec<String>,
    interval: Duration,
    batch_size: i64,
) -> Result<()> {
    let producer = kafka_producer::build_producer(&kafka_brokers)?;
    let dispatcher = outbox_dispatcher::Dispatcher::new(pool, PgOutboxRepository::new(), producer, batch_size);

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = dispatcher.tick().await {
            error!(error = %e, "outbox dispatcher tick failed");
        }
    }
}

async fn run_orphan_sweeper<R1, R2, R3>(
    order_service: Arc<OrderServiceImpl<R1, R2, R3>>,
    interval: Duration,
    orphan_ttl: Duration,
) -> Result<()>
where
    R1: repository::OrderRepository + Send + Sync,
    R2: repository::OutboxRepository + Send + Sync,
    R3: repository::StockRepository + Send + Sync,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match order_service.sweep_orphans(orphan_ttl.as_secs() as i64).await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "swept orphaned orders stuck at 'new'"),
            Err(e) => error!(error = %e, "orphan sweep failed"),
        }
    }
}
