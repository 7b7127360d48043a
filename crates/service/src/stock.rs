//! Stock reservation business logic.
//!
//! `Reserve`/`ReserveRemove`/`ReserveCancel` all batch-load their target rows
//! under `FOR UPDATE` through a caller-supplied transaction, mutate an
//! in-memory map, and write the whole map back in one batched statement —
//! never a per-item round trip.

use model::{Item, Sku, Stock};
use repository::{RepositoryError, StockRepository};
use std::collections::HashMap;
use thiserror::Error;
use tokio_postgres::Transaction;

#[derive(Debug, Error)]
pub enum StockError {
    #[error("stock not found for sku {0}")]
    StockNotFound(Sku),
    #[error("not enough stock available")]
    NotEnoughStock,
    #[error("reserve operation would underflow reserved count for sku {0}")]
    InvalidReserveOperation(Sku),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct StockServiceImpl<R> {
    stock_repo: R,
}

impl<R> StockServiceImpl<R>
where
    R: StockRepository + Send + Sync,
{
    pub fn new(stock_repo: R) -> Self {
        Self { stock_repo }
    }

    /// Available-to-sell count for a single SKU. Treats zero the same as negative:
    /// both mean nothing is left to reserve.
    pub async fn stocks_info(&self, sku: Sku) -> Result<i64, StockError> {
        let stock = self
            .stock_repo
            .get_stock(sku)
            .await
            .map_err(|e| map_not_found(e, sku))?;
        let remainder = stock.available();
        if remainder <= 0 {
            return Err(StockError::NotEnoughStock);
        }
        Ok(remainder)
    }

    /// Increments `reserved` for every item, failing atomically if any SKU
    /// would end up over its total count.
    pub async fn reserve(&self, tx: &Transaction<'_>, items: &[Item]) -> Result<(), StockError> {
        let skus: Vec<Sku> = items.iter().map(|i| i.sku).collect();
        let mut stocks = self.stock_repo.get_stocks_for_update(tx, &skus).await?;

        for item in items {
            let stock = stocks
                .get_mut(&item.sku)
                .ok_or(StockError::StockNotFound(item.sku))?;
            if stock.total_count < stock.reserved + item.count as u64 {
                return Err(StockError::NotEnoughStock);
            }
            stock.reserved += item.count as u64;
        }

        self.stock_repo.update_stocks(tx, &stocks).await?;
        Ok(())
    }

    /// Decrements both `reserved` and `total_count` — the stock actually ships.
    pub async fn reserve_remove(&self, tx: &Transaction<'_>, items: &[Item]) -> Result<(), StockError> {
        let skus: Vec<Sku> = items.iter().map(|i| i.sku).collect();
        let mut stocks = self.stock_repo.get_stocks_for_update(tx, &skus).await?;

        for item in items {
            let stock = stocks
                .get_mut(&item.sku)
                .ok_or(StockError::StockNotFound(item.sku))?;
            let count = item.count as u64;
            if stock.reserved < count || stock.total_count < count {
                return Err(StockError::InvalidReserveOperation(item.sku));
            }
            stock.reserved -= count;
            stock.total_count -= count;
        }

        self.stock_repo.update_stocks(tx, &stocks).await?;
        Ok(())
    }

    /// Decrements `reserved` only — the reservation is released, stock stays on the shelf.
    pub async fn reserve_cancel(&self, tx: &Transaction<'_>, items: &[Item]) -> Result<(), StockError> {
        let skus: Vec<Sku> = items.iter().map(|i| i.sku).collect();
        let mut stocks = self.stock_repo.get_stocks_for_update(tx, &skus).await?;

        for item in items {
            let stock = stocks
                .get_mut(&item.sku)
                .ok_or(StockError::StockNotFound(item.sku))?;
            let count = item.count as u64;
            if stock.reserved < count {
                return Err(StockError::InvalidReserveOperation(item.sku));
            }
            stock.reserved -= count;
        }

        self.stock_repo.update_stocks(tx, &stocks).await?;
        Ok(())
    }
}

fn map_not_found(err: RepositoryError, sku: Sku) -> StockError {
    match err {
        RepositoryError::StockNotFound => StockError::StockNotFound(sku),
        other => StockError::Repository(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeStockRepo {
        stocks: Mutex<HashMap<Sku, Stock>>,
    }

    #[async_trait]
    impl StockRepository for FakeStockRepo {
        async fn get_stock(&self, sku: Sku) -> Result<Stock, RepositoryError> {
            self.stocks
                .lock()
                .unwrap()
                .get(&sku)
                .copied()
                .ok_or(RepositoryError::StockNotFound)
        }

        async fn get_stocks_for_update(
            &self,
            _tx: &Transaction<'_>,
            skus: &[Sku],
        ) -> Result<HashMap<Sku, Stock>, RepositoryError> {
            let guard = self.stocks.lock().unwrap();
            let mut out = HashMap::new();
            for sku in skus {
                if let Some(s) = guard.get(sku) {
                    out.insert(*sku, *s);
                }
            }
            Ok(out)
        }

        async fn update_stocks(
            &self,
            _tx: &Transaction<'_>,
            stocks: &HashMap<Sku, Stock>,
        ) -> Result<(), RepositoryError> {
            let mut guard = self.stocks.lock().unwrap();
            for (sku, stock) in stocks {
                guard.insert(*sku, *stock);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stocks_info_reports_not_enough_stock_at_zero_remainder() {
        let repo = FakeStockRepo {
            stocks: Mutex::new(HashMap::from([(
                1001,
                Stock {
                    sku: 1001,
                    total_count: 10,
                    reserved: 10,
                },
            )])),
        };
        let svc = StockServiceImpl::new(repo);
        let err = svc.stocks_info(1001).await.unwrap_err();
        assert!(matches!(err, StockError::NotEnoughStock));
    }

    #[tokio::test]
    async fn stocks_info_missing_sku_reports_stock_not_found() {
        let repo = FakeStockRepo {
            stocks: Mutex::new(HashMap::new()),
        };
        let svc = StockServiceImpl::new(repo);
        let err = svc.stocks_info(9999).await.unwrap_err();
        assert!(matches!(err, StockError::StockNotFound(9999)));
    }
}
