//! Order lifecycle: the two-phase create, and the pay/cancel/info operations.

use crate::stock::{StockError, StockServiceImpl};
use chrono::Utc;
use deadpool_postgres::Pool;
use model::{Item, Order, OrderEvent, OrderId, OrderStatus};
use repository::{OrderRepository, OutboxRepository, RepositoryError, StockRepository};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    OrderNotFound,
    #[error("order status does not allow this transition")]
    InvalidState,
    #[error("not enough stock to fulfil order")]
    NotEnoughStock,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to serialize outbox event: {0}")]
    EventEncoding(#[from] serde_json::Error),
}

impl From<txmgr::TxError<OrderError>> for OrderError {
    fn from(err: txmgr::TxError<OrderError>) -> Self {
        match err {
            txmgr::TxError::Begin(e) | txmgr::TxError::Commit(e) => OrderError::Repository(RepositoryError::Db(e)),
            txmgr::TxError::Body(e) => e,
        }
    }
}

impl From<StockError> for OrderError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::StockNotFound(_) => OrderError::NotEnoughStock,
            StockError::NotEnoughStock => OrderError::NotEnoughStock,
            StockError::InvalidReserveOperation(_) => OrderError::InvalidState,
            StockError::Repository(e) => OrderError::Repository(e),
        }
    }
}

fn is_out_of_stock(err: &OrderError) -> bool {
    matches!(err, OrderError::NotEnoughStock)
}

/// The order lifecycle service, generic over its repository implementations so
/// it can be exercised against fakes in tests and concrete Postgres types in
/// production, the same way the repository traits themselves are generic.
pub struct OrderServiceImpl<R1, R2, R3> {
    db_pool: Pool,
    order_topic: String,
    order_repo: R1,
    outbox_repo: R2,
    stock_service: StockServiceImpl<R3>,
}

impl<R1, R2, R3> OrderServiceImpl<R1, R2, R3>
where
    R1: OrderRepository + Send + Sync,
    R2: OutboxRepository + Send + Sync,
    R3: StockRepository + Send + Sync,
{
    pub fn new(db_pool: Pool, order_topic: String, order_repo: R1, outbox_repo: R2, stock_repo: R3) -> Self {
        Self {
            db_pool,
            order_topic,
            order_repo,
            outbox_repo,
            stock_service: StockServiceImpl::new(stock_repo),
        }
    }

    fn encode_event(&self, order_id: OrderId, status: OrderStatus) -> Result<(String, Vec<u8>), OrderError> {
        let event = OrderEvent::new(order_id, status, Utc::now());
        let payload = serde_json::to_vec(&event)?;
        Ok((order_id.to_string(), payload))
    }

    /// Phase one: durably record the order as `new` plus its items and a
    /// `new` outbox event, all in one transaction. A crash after this commits
    /// but before phase two leaves a recoverable orphan (see the sweeper).
    #[instrument(skip(self, items))]
    async fn create_order_record(&self, user_id: i64, items: &[Item]) -> Result<OrderId, OrderError> {
        let mut client = self.db_pool.get().await.map_err(RepositoryError::from)?;
        let order_id = txmgr::read_committed(&mut client, |tx| async move {
            let order_id = self.order_repo.create_order(&tx, user_id).await?;
            self.order_repo.create_order_items(&tx, order_id, items).await?;

            let (key, payload) = self.encode_event(order_id, OrderStatus::New)?;
            self.outbox_repo
                .create_event(&tx, &self.order_topic, &key, &payload)
                .await?;

            Ok::<_, OrderError>((order_id, tx))
        })
        .await?;
        Ok(order_id)
    }

    /// Phase two: reserve stock and advance the order to `awaiting payment`,
    /// all in one transaction.
    async fn reserve_and_advance(&self, order_id: OrderId, items: &[Item]) -> Result<(), OrderError> {
        let mut client = self.db_pool.get().await.map_err(RepositoryError::from)?;
        txmgr::read_committed(&mut client, |tx| async move {
            self.stock_service.reserve(&tx, items).await?;
            self.order_repo
                .set_status(&tx, order_id, OrderStatus::AwaitingPayment)
                .await?;
            let (key, payload) = self.encode_event(order_id, OrderStatus::AwaitingPayment)?;
            self.outbox_repo
                .create_event(&tx, &self.order_topic, &key, &payload)
                .await?;

            Ok::<_, OrderError>(((), tx))
        })
        .await?;
        Ok(())
    }

    /// Compensating write, run in its own transaction after a failed reservation.
    async fn mark_failed(&self, order_id: OrderId) -> Result<(), OrderError> {
        let mut client = self.db_pool.get().await.map_err(RepositoryError::from)?;
        txmgr::read_committed(&mut client, |tx| async move {
            self.order_repo.set_status(&tx, order_id, OrderStatus::Failed).await?;
            let (key, payload) = self.encode_event(order_id, OrderStatus::Failed)?;
            self.outbox_repo
                .create_event(&tx, &self.order_topic, &key, &payload)
                .await?;

            Ok::<_, OrderError>(((), tx))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self, items))]
    pub async fn create(&self, user_id: i64, items: Vec<Item>) -> Result<OrderId, OrderError> {
        let order_id = self.create_order_record(user_id, &items).await?;

        match self.reserve_and_advance(order_id, &items).await {
            Ok(()) => Ok(order_id),
            Err(err) if is_out_of_stock(&err) => {
                self.mark_failed(order_id).await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn pay(&self, order_id: OrderId) -> Result<(), OrderError> {
        let mut client = self.db_pool.get().await.map_err(RepositoryError::from)?;
        txmgr::read_committed(&mut client, |tx| async move {
            let order = self.order_repo.get_by_order_id_for_update(&tx, order_id).await?;

            if order.status == OrderStatus::Payed {
                return Ok(((), tx));
            }
            if order.status != OrderStatus::AwaitingPayment {
                return Err(OrderError::InvalidState);
            }

            self.stock_service.reserve_remove(&tx, &order.items).await?;
            self.order_repo.set_status(&tx, order_id, OrderStatus::Payed).await?;
            let (key, payload) = self.encode_event(order_id, OrderStatus::Payed)?;
            self.outbox_repo
                .create_event(&tx, &self.order_topic, &key, &payload)
                .await?;

            Ok::<_, OrderError>(((), tx))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId) -> Result<(), OrderError> {
        let mut client = self.db_pool.get().await.map_err(RepositoryError::from)?;
        txmgr::read_committed(&mut client, |tx| async move {
            let order = self.order_repo.get_by_order_id_for_update(&tx, order_id).await?;

            match order.status {
                OrderStatus::Cancelled => return Ok(((), tx)),
                OrderStatus::Failed | OrderStatus::Payed => return Err(OrderError::InvalidState),
                _ => {}
            }

            self.stock_service.reserve_cancel(&tx, &order.items).await?;
            self.order_repo
                .set_status(&tx, order_id, OrderStatus::Cancelled)
                .await?;
            let (key, payload) = self.encode_event(order_id, OrderStatus::Cancelled)?;
            self.outbox_repo
                .create_event(&tx, &self.order_topic, &key, &payload)
                .await?;

            Ok::<_, OrderError>(((), tx))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn info(&self, order_id: OrderId) -> Result<Order, OrderError> {
        let mut order = self
            .order_repo
            .get_by_order_id(order_id)
            .await
            .map_err(|e| match e {
                RepositoryError::OrderNotFound => OrderError::OrderNotFound,
                other => OrderError::Repository(other),
            })?;
        order.items.sort_unstable_by_key(|i| i.sku);
        Ok(order)
    }

    /// Sweeps orders stuck at `new` past their TTL — the two-phase create left
    /// them behind a crash between transactions — and fails them off so they
    /// stop blocking reconciliation.
    #[instrument(skip(self))]
    pub async fn sweep_orphans(&self, older_than_secs: i64) -> Result<usize, OrderError> {
        let stale = self.order_repo.find_stale_new(older_than_secs).await?;
        for order_id in &stale {
            self.mark_failed(*order_id).await?;
        }
        Ok(stale.len())
    }
}
