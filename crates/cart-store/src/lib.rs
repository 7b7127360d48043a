//! In-memory cart storage, keyed `user_id -> sku -> Item`, guarded by a
//! single read/write lock. This map IS the authoritative store for carts —
//! there is no backing table.

use model::{Item, Sku};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CartStoreError {
    #[error("item not found in cart")]
    ItemNotFound,
    #[error("cart is empty")]
    EmptyCart,
}

type UserId = u64;

#[derive(Debug, Default, Clone)]
pub struct CartStore {
    inner: Arc<RwLock<HashMap<UserId, HashMap<Sku, Item>>>>,
}

impl CartStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Accumulates `item.count` into the existing line, or inserts a new one.
    pub async fn add_item(&self, user_id: UserId, item: Item) {
        let mut carts = self.inner.write().await;
        let cart = carts.entry(user_id).or_default();
        cart.entry(item.sku)
            .and_modify(|existing| existing.count += item.count)
            .or_insert(item);
    }

    /// No-op if the line (or the whole cart) is already absent.
    pub async fn delete_item(&self, user_id: UserId, sku: Sku) {
        let mut carts = self.inner.write().await;
        if let Some(cart) = carts.get_mut(&user_id) {
            cart.remove(&sku);
            if cart.is_empty() {
                carts.remove(&user_id);
            }
        }
    }

    /// No-op if the user has no cart.
    pub async fn delete_items_by_user_id(&self, user_id: UserId) {
        let mut carts = self.inner.write().await;
        carts.remove(&user_id);
    }

    pub async fn get_items_by_user_id(&self, user_id: UserId) -> Result<Vec<Item>, CartStoreError> {
        let carts = self.inner.read().await;
        let cart = carts.get(&user_id).ok_or(CartStoreError::EmptyCart)?;
        Ok(cart.values().copied().collect())
    }

    pub async fn get_item_of_user_id_by_sku(&self, user_id: UserId, sku: Sku) -> Result<Item, CartStoreError> {
        let carts = self.inner.read().await;
        carts
            .get(&user_id)
            .and_then(|cart| cart.get(&sku))
            .copied()
            .ok_or(CartStoreError::ItemNotFound)
    }

    /// Sum of all counts across all users, sampled by the cart-size gauge daemon.
    pub async fn get_count_items(&self) -> u32 {
        let carts = self.inner.read().await;
        carts.values().flat_map(|cart| cart.values()).map(|item| item.count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_item_accumulates_count_on_repeat_add() {
        let store = CartStore::new();
        store.add_item(1, Item { sku: 1001, count: 2 }).await;
        store.add_item(1, Item { sku: 1001, count: 3 }).await;

        let item = store.get_item_of_user_id_by_sku(1, 1001).await.unwrap();
        assert_eq!(item.count, 5);
    }

    #[tokio::test]
    async fn delete_item_removes_user_entirely_once_empty() {
        let store = CartStore::new();
        store.add_item(1, Item { sku: 1001, count: 1 }).await;
        store.delete_item(1, 1001).await;

        let err = store.get_items_by_user_id(1).await.unwrap_err();
        assert_eq!(err, CartStoreError::EmptyCart);
    }

    #[tokio::test]
    async fn get_item_of_user_id_by_sku_reports_item_not_found_for_missing_user() {
        let store = CartStore::new();
        let err = store.get_item_of_user_id_by_sku(99, 1001).await.unwrap_err();
        assert_eq!(err, CartStoreError::ItemNotFound);
    }

    #[tokio::test]
    async fn get_count_items_sums_across_users() {
        let store = CartStore::new();
        store.add_item(1, Item { sku: 1001, count: 2 }).await;
        store.add_item(2, Item { sku: 1002, count: 5 }).await;
        assert_eq!(store.get_count_items().await, 7);
    }

    #[tokio::test]
    async fn delete_items_by_user_id_is_a_noop_when_absent() {
        let store = CartStore::new();
        store.delete_items_by_user_id(42).await;
        assert_eq!(store.get_count_items().await, 0);
    }
}
