//! tonic server wiring for the `Orders`/`Stocks` gRPC services, and the
//! domain-error-to-gRPC-status mapping that used to live in the handler
//! package of the original implementation.

use loms_proto::v1::orders_server::Orders;
use loms_proto::v1::stocks_server::Stocks;
use loms_proto::v1::{
    Item as PbItem, OrderCancelRequest, OrderCancelResponse, OrderCreateRequest, OrderCreateResponse,
    OrderInfoRequest, OrderInfoResponse, OrderPayRequest, OrderPayResponse, StocksInfoRequest, StocksInfoResponse,
};
use model::Item;
use repository::{OrderRepository, OutboxRepository, StockRepository};
use service::order::{OrderError, OrderServiceImpl};
use service::stock::{StockError, StockServiceImpl};
use std::collections::HashSet;
use std::sync::Arc;
use tonic::{Request, Response, Status};

pub struct LomsGrpcService<R1, R2, R3> {
    orders: Arc<OrderServiceImpl<R1, R2, R3>>,
    stocks: Arc<StockServiceImpl<R3>>,
}

impl<R1, R2, R3> Clone for LomsGrpcService<R1, R2, R3> {
    fn clone(&self) -> Self {
        Self {
            orders: self.orders.clone(),
            stocks: self.stocks.clone(),
        }
    }
}

impl<R1, R2, R3> LomsGrpcService<R1, R2, R3> {
    pub fn new(orders: Arc<OrderServiceImpl<R1, R2, R3>>, stocks: Arc<StockServiceImpl<R3>>) -> Self {
        Self { orders, stocks }
    }
}

fn order_error_to_status(err: OrderError) -> Status {
    match err {
        OrderError::OrderNotFound => Status::not_found(err.to_string()),
        OrderError::InvalidState => Status::failed_precondition(err.to_string()),
        OrderError::NotEnoughStock => Status::failed_precondition(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn stock_error_to_status(err: StockError) -> Status {
    match err {
        StockError::StockNotFound(_) => Status::not_found(err.to_string()),
        other => Status::internal(other.to_string()),
    }
}

fn validate_unique_skus(items: &[Item]) -> Result<(), Status> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item.sku) {
            return Err(Status::invalid_argument(format!("duplicate sku in order: {}", item.sku)));
        }
    }
    Ok(())
}

fn items_from_pb(items: Vec<PbItem>) -> Vec<Item> {
    items
        .into_iter()
        .map(|i| Item {
            sku: i.sku as u64,
            count: i.count,
        })
        .collect()
}

fn items_to_pb(items: Vec<Item>) -> Vec<PbItem> {
    items
        .into_iter()
        .map(|i| PbItem {
            sku: i.sku as i64,
            count: i.count,
        })
        .collect()
}

#[tonic::async_trait]
impl<R1, R2, R3> Orders for LomsGrpcService<R1, R2, R3>
where
    R1: OrderRepository + Send + Sync + 'static,
    R2: OutboxRepository + Send + Sync + 'static,
    R3: StockRepository + Send + Sync + 'static,
{
    async fn order_create(
        &self,
        request: Request<OrderCreateRequest>,
    ) -> Result<Response<OrderCreateResponse>, Status> {
        let req = request.into_inner();
        let items = items_from_pb(req.items);
        validate_unique_skus(&items)?;

        let order_id = self
            .orders
            .create(req.user_id, items)
            .await
            .map_err(order_error_to_status)?;

        Ok(Response::new(OrderCreateResponse { order_id }))
    }

    async fn order_info(&self, request: Request<OrderInfoRequest>) -> Result<Response<OrderInfoResponse>, Status> {
        let req = request.into_inner();
        let order = self.orders.info(req.order_id).await.map_err(order_error_to_status)?;

        Ok(Response::new(OrderInfoResponse {
            status: order.status.as_str().to_string(),
            user_id: order.user_id,
            items: items_to_pb(order.items),
        }))
    }

    async fn order_pay(&self, request: Request<OrderPayRequest>) -> Result<Response<OrderPayResponse>, Status> {
        let req = request.into_inner();
        self.orders.pay(req.order_id).await.map_err(order_error_to_status)?;
        Ok(Response::new(OrderPayResponse {}))
    }

    async fn order_cancel(
        &self,
        request: Request<OrderCancelRequest>,
    ) -> Result<Response<OrderCancelResponse>, Status> {
        let req = request.into_inner();
        self.orders.cancel(req.order_id).await.map_err(order_error_to_status)?;
        Ok(Response::new(OrderCancelResponse {}))
    }
}

#[tonic::async_trait]
impl<R1, R2, R3> Stocks for LomsGrpcService<R1, R2, R3>
where
    R1: Send + Sync + 'static,
    R2: Send + Sync + 'static,
    R3: StockRepository + Send + Sync + 'static,
{
    async fn stocks_info(&self, request: Request<StocksInfoRequest>) -> Result<Response<StocksInfoResponse>, Status> {
        let req = request.into_inner();
        let count = self
            .stocks
            .stocks_info(req.sku as u64)
            .await
            .map_err(stock_error_to_status)?;

        Ok(Response::new(StocksInfoResponse { count: count as u32 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_unique_skus_rejects_duplicates() {
        let items = vec![Item { sku: 1001, count: 1 }, Item { sku: 1001, count: 2 }];
        let err = validate_unique_skus(&items).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn validate_unique_skus_accepts_distinct_skus() {
        let items = vec![Item { sku: 1001, count: 1 }, Item { sku: 1002, count: 2 }];
        assert!(validate_unique_skus(&items).is_ok());
    }
}
