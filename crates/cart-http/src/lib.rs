//! HTTP front door for the cart service: add/remove lines, read an enriched
//! cart, and checkout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cart_service::{CartError, CartServiceImpl};
use model::Item;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

pub struct Server {
    cart_service: Arc<CartServiceImpl>,
    port: String,
    metrics: Arc<Metrics>,
}

struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("failed to create errors_total metric");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("failed to register http_requests_total metric");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("failed to register http_request_duration_seconds metric");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("failed to register errors_total metric");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total.with_label_values(&[source, endpoint]).inc();
    }
}

impl Server {
    pub fn new(port: String, cart_service: Arc<CartServiceImpl>) -> Self {
        info!(port, "initializing cart HTTP server");

        Self {
            cart_service,
            port,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Exposes the server's Prometheus registry so the process can register
    /// additional collectors (the cart-size gauge daemon) into the same
    /// `/metrics` output.
    pub fn registry(&self) -> Registry {
        self.metrics.registry.clone()
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("failed to bind to port")?;

        info!(port = %self.port, "cart HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        info!("cart HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.metrics.clone();
        let cart_service = self.cart_service.clone();

        Router::new()
            .route("/user/{user_id}/cart/{sku_id}", post(add_item_handler))
            .route("/user/{user_id}/cart", get(get_items_handler))
            .route("/user/{user_id}/cart/{sku_id}", delete(delete_item_handler))
            .route("/user/{user_id}/cart", delete(delete_cart_handler))
            .route("/checkout/{user_id}", post(checkout_handler))
            .route("/health", get(handle_health))
            .route("/metrics", get(handle_metrics))
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                metrics_middleware,
            ))
            .with_state(AppState { cart_service, metrics })
    }
}

#[derive(Clone)]
struct AppState {
    cart_service: Arc<CartServiceImpl>,
    metrics: Arc<Metrics>,
}

async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let start = std::time::Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    metrics.record_request(&method, &path, status, start.elapsed());
    if status >= 400 {
        metrics.record_error("http", &path);
    }

    response
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    #[derive(Serialize)]
    struct ErrorMessage {
        message: String,
    }
    (status, Json(ErrorMessage { message: message.into() })).into_response()
}

/// A path segment of `0` is as invalid as one that doesn't parse — callers
/// never have a real id of zero.
fn require_nonzero(raw: u64, what: &str) -> Result<u64, Response> {
    if raw == 0 {
        Err(error_response(StatusCode::BAD_REQUEST, format!("invalid {what}")))
    } else {
        Ok(raw)
    }
}

fn cart_error_status(err: &CartError) -> StatusCode {
    match err {
        CartError::ProductNotFound | CartError::NotEnoughStocks => StatusCode::PRECONDITION_FAILED,
        CartError::EmptyCart => StatusCode::NOT_FOUND,
        CartError::Catalog(_) | CartError::Loms(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
struct AddItemRequest {
    count: u32,
}

async fn add_item_handler(
    State(state): State<AppState>,
    Path((user_id, sku_id)): Path<(u64, u64)>,
    Json(req): Json<AddItemRequest>,
) -> Response {
    let user_id = match require_nonzero(user_id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let sku_id = match require_nonzero(sku_id, "sku") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if req.count == 0 {
        return error_response(StatusCode::BAD_REQUEST, "count must be greater than zero");
    }

    let item = Item { sku: sku_id, count: req.count };

    match state.cart_service.add_item(user_id, item).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            warn!(%err, "add_item rejected");
            error_response(cart_error_status(&err), err.to_string())
        }
    }
}

#[derive(Serialize)]
struct GetItemsResponseItem {
    sku: u64,
    name: String,
    count: u32,
    price: u32,
}

#[derive(Serialize)]
struct GetItemsResponse {
    items: Vec<GetItemsResponseItem>,
    total_price: u32,
}

async fn get_items_handler(State(state): State<AppState>, Path(user_id): Path<u64>) -> Response {
    let user_id = match require_nonzero(user_id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.cart_service.get_items_by_user_id(user_id).await {
        Ok(cart) => {
            let items = cart
                .items
                .into_iter()
                .map(|ci| GetItemsResponseItem {
                    sku: ci.sku,
                    name: ci.name,
                    count: ci.count,
                    price: ci.price,
                })
                .collect();
            Json(GetItemsResponse {
                items,
                total_price: cart.total_price,
            })
            .into_response()
        }
        Err(CartError::EmptyCart) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(%err, "get_items_by_user_id failed");
            error_response(cart_error_status(&err), err.to_string())
        }
    }
}

async fn delete_item_handler(State(state): State<AppState>, Path((user_id, sku_id)): Path<(u64, u64)>) -> Response {
    let user_id = match require_nonzero(user_id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let sku_id = match require_nonzero(sku_id, "sku") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    state.cart_service.delete_item(user_id, sku_id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_cart_handler(State(state): State<AppState>, Path(user_id): Path<u64>) -> Response {
    let user_id = match require_nonzero(user_id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    state.cart_service.delete_items_by_user_id(user_id).await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Serialize)]
struct CheckoutResponse {
    order_id: i64,
}

async fn checkout_handler(State(state): State<AppState>, Path(user_id): Path<u64>) -> Response {
    let user_id = match require_nonzero(user_id, "user id") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.cart_service.checkout(user_id).await {
        Ok(order_id) => Json(CheckoutResponse { order_id }).into_response(),
        Err(CartError::EmptyCart) => error_response(StatusCode::NOT_FOUND, "cart is empty"),
        Err(err) => {
            error!(%err, "checkout failed");
            error_response(cart_error_status(&err), err.to_string())
        }
    }
}

async fn handle_health() -> &'static str {
    "OK"
}

async fn handle_metrics(State(state): State<AppState>) -> Response {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
        error!(%e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            error!(%e, "metrics buffer was not valid utf-8");
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid metrics data").into_response()
        }
    }
}

async fn shutdown_signal() {
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

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_nonzero_rejects_zero() {
        assert!(require_nonzero(0, "user id").is_err());
        assert!(require_nonzero(7, "user id").is_ok());
    }

    #[test]
    fn cart_error_status_maps_precondition_failures() {
        assert_eq!(cart_error_status(&CartError::ProductNotFound), StatusCode::PRECONDITION_FAILED);
        assert_eq!(cart_error_status(&CartError::NotEnoughStocks), StatusCode::PRECONDITION_FAILED);
        assert_eq!(cart_error_status(&CartError::EmptyCart), StatusCode::NOT_FOUND);
    }
}
