//! Cart's gRPC client wrapper for LOMS's `Orders`/`Stocks` services.

use loms_proto::v1::orders_client::OrdersClient;
use loms_proto::v1::stocks_client::StocksClient;
use loms_proto::v1::{Item as PbItem, OrderCreateRequest, StocksInfoRequest};
use model::Item;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum LomsClientError {
    #[error("order not found")]
    OrderNotFound,
    #[error("order or stock state does not allow this operation")]
    FailedPrecondition(String),
    #[error("invalid request: {0}")]
    InvalidArgument(String),
    #[error("loms rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("failed to connect to loms: {0}")]
    Connect(#[from] tonic::transport::Error),
}

fn map_status(status: tonic::Status) -> LomsClientError {
    match status.code() {
        Code::NotFound => LomsClientError::OrderNotFound,
        Code::FailedPrecondition => LomsClientError::FailedPrecondition(status.message().to_string()),
        Code::InvalidArgument => LomsClientError::InvalidArgument(status.message().to_string()),
        _ => LomsClientError::Rpc(status),
    }
}

#[derive(Clone)]
pub struct LomsClient {
    orders: OrdersClient<Channel>,
    stocks: StocksClient<Channel>,
    timeout: Duration,
}

impl LomsClient {
    pub async fn connect(addr: String, timeout: Duration) -> Result<Self, LomsClientError> {
        let endpoint = Endpoint::from_shared(addr)?;
        let channel = endpoint.connect().await?;
        Ok(Self {
            orders: OrdersClient::new(channel.clone()),
            stocks: StocksClient::new(channel),
            timeout,
        })
    }

    #[instrument(skip(self, items))]
    pub async fn order_create(&self, user_id: u64, items: &[Item]) -> Result<i64, LomsClientError> {
        let mut orders = self.orders.clone();
        let req = OrderCreateRequest {
            user_id: user_id as i64,
            items: items
                .iter()
                .map(|i| PbItem {
                    sku: i.sku as i64,
                    count: i.count,
                })
                .collect(),
        };

        let mut request = tonic::Request::new(req);
        request.set_timeout(self.timeout);

        let resp = orders.order_create(request).await.map_err(map_status)?;
        Ok(resp.into_inner().order_id)
    }

    #[instrument(skip(self))]
    pub async fn stocks_info(&self, sku: u64) -> Result<i64, LomsClientError> {
        let mut stocks = self.stocks.clone();
        let req = StocksInfoRequest { sku: sku as i64 };

        let mut request = tonic::Request::new(req);
        request.set_timeout(self.timeout);

        let resp = stocks.stocks_info(request).await.map_err(map_status)?;
        Ok(resp.into_inner().count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_maps_to_order_not_found() {
        let status = tonic::Status::not_found("nope");
        assert!(matches!(map_status(status), LomsClientError::OrderNotFound));
    }

    #[test]
    fn failed_precondition_status_carries_message() {
        let status = tonic::Status::failed_precondition("not enough stock");
        match map_status(status) {
            LomsClientError::FailedPrecondition(msg) => assert_eq!(msg, "not enough stock"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
