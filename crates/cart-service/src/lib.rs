//! Cart business logic: add/delete lines, bounded-concurrency enrichment,
//! and checkout against LOMS.

use cart_store::{CartStore, CartStoreError};
use catalog_client::{CatalogClient, CatalogError};
use loms_client::{LomsClient, LomsClientError};
use model::{CartItem, Item, Sku};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum CartError {
    #[error("product not found")]
    ProductNotFound,
    #[error("not enough stock to add this many")]
    NotEnoughStocks,
    #[error("cart is empty")]
    EmptyCart,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Loms(#[from] LomsClientError),
}

impl From<CartStoreError> for CartError {
    fn from(_: CartStoreError) -> Self {
        // Both `CartStoreError` variants (`ItemNotFound`, `EmptyCart`) surface to
        // callers as an empty-cart precondition in this service's call sites —
        // `ItemNotFound` only ever occurs on the "check existing count" lookup,
        // which treats it as zero rather than an error (see `add_item`).
        CartError::EmptyCart
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub total_price: u32,
}

pub struct CartServiceImpl {
    store: CartStore,
    catalog: Arc<CatalogClient>,
    loms: LomsClient,
    workers: usize,
}

impl CartServiceImpl {
    pub fn new(store: CartStore, catalog: Arc<CatalogClient>, loms: LomsClient, workers: usize) -> Self {
        Self {
            store,
            catalog,
            loms,
            workers: workers.max(1),
        }
    }

    #[instrument(skip(self))]
    pub async fn add_item(&self, user_id: u64, item: Item) -> Result<(), CartError> {
        self.catalog
            .get_product_by_sku(item.sku)
            .await
            .map_err(|e| match e {
                CatalogError::ProductNotFound(_) => CartError::ProductNotFound,
                other => CartError::Catalog(other),
            })?;

        let available = self.loms.stocks_info(item.sku).await?;

        let current_count = match self.store.get_item_of_user_id_by_sku(user_id, item.sku).await {
            Ok(existing) => existing.count,
            Err(CartStoreError::ItemNotFound) => 0,
            Err(other) => return Err(other.into()),
        };

        let new_count = current_count + item.count;
        if i64::from(new_count) > available {
            return Err(CartError::NotEnoughStocks);
        }

        self.store.add_item(user_id, item).await;
        Ok(())
    }

    pub async fn delete_item(&self, user_id: u64, sku: Sku) {
        self.store.delete_item(user_id, sku).await;
    }

    pub async fn delete_items_by_user_id(&self, user_id: u64) {
        self.store.delete_items_by_user_id(user_id).await;
    }

    /// Fetches the user's cart lines and enriches each with live catalog data,
    /// at most `workers` fetches in flight. A `ProductNotFound` silently drops
    /// that line; any other fetch error cancels the remaining fetches and
    /// surfaces as the result.
    #[instrument(skip(self))]
    pub async fn get_items_by_user_id(&self, user_id: u64) -> Result<Cart, CartError> {
        let items = self.store.get_items_by_user_id(user_id).await?;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for item in items {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let catalog = self.catalog.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(None);
                };

                tokio::select! {
                    _ = cancel.cancelled() => Ok(None),
                    result = catalog.get_product_by_sku(item.sku) => match result {
                        Ok(product) => Ok(Some(CartItem {
                            sku: item.sku,
                            name: product.name,
                            count: item.count,
                            price: product.price,
                        })),
                        Err(CatalogError::ProductNotFound(sku)) => {
                            info!(sku, "product no longer exists in catalog, dropping cart line");
                            Ok(None)
                        }
                        Err(e) => {
                            cancel.cancel();
                            Err(e)
                        }
                    },
                }
            });
        }

        let mut cart_items = Vec::new();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(cart_item))) => cart_items.push(cart_item),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_join_error) => continue,
            };
        }

        if let Some(err) = first_error {
            return Err(CartError::Catalog(err));
        }

        if cart_items.is_empty() {
            return Err(CartError::EmptyCart);
        }

        let total_price = cart_items.iter().map(|i| i.price * i.count).sum();
        cart_items.sort_unstable_by_key(|i| i.sku);

        Ok(Cart {
            items: cart_items,
            total_price,
        })
    }

    #[instrument(skip(self))]
    pub async fn checkout(&self, user_id: u64) -> Result<i64, CartError> {
        let cart = self.get_items_by_user_id(user_id).await?;
        let items: Vec<Item> = cart
            .items
            .iter()
            .map(|ci| Item {
                sku: ci.sku,
                count: ci.count,
            })
            .collect();

        let order_id = self.loms.order_create(user_id, &items).await?;
        self.store.delete_items_by_user_id(user_id).await;
        Ok(order_id)
    }
}
