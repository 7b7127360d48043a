//! Domain types shared by the Cart, LOMS, and Notifier services.
//!
//! These are plain data carriers: no persistence or transport logic lives here,
//! only the shapes the rest of the workspace agrees on plus the closed enums
//! that encode the order and outbox-event state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stock-keeping unit identifier. Shared by Cart and LOMS; both treat it as an
/// opaque positive integer.
pub type Sku = u64;

/// A line in a cart or an order request: a SKU and how many units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Item {
    pub sku: Sku,
    pub count: u32,
}

/// Catalog-side product data, fetched per SKU from the external ProductCatalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub sku: Sku,
    pub name: String,
    pub price: u32,
}

/// Item ⊕ Product: the join view produced when reading a cart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartItem {
    pub sku: Sku,
    pub name: String,
    pub count: u32,
    pub price: u32,
}

/// On-hand inventory for one SKU. Invariant: `0 <= reserved <= total_count`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stock {
    pub sku: Sku,
    pub total_count: u64,
    pub reserved: u64,
}

impl Stock {
    pub fn available(&self) -> i64 {
        self.total_count as i64 - self.reserved as i64
    }
}

/// Closed set of states an order may occupy. `Payed`, `Cancelled`, and
/// `Failed` are terminal: no further transition is legal from them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, postgres_types::ToSql, postgres_types::FromSql)]
#[postgres(name = "order_status")]
pub enum OrderStatus {
    #[serde(rename = "new")]
    #[postgres(name = "new")]
    New,
    #[serde(rename = "awaiting payment")]
    #[postgres(name = "awaiting payment")]
    AwaitingPayment,
    #[serde(rename = "payed")]
    #[postgres(name = "payed")]
    Payed,
    #[serde(rename = "cancelled")]
    #[postgres(name = "cancelled")]
    Cancelled,
    #[serde(rename = "failed")]
    #[postgres(name = "failed")]
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Payed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::AwaitingPayment => "awaiting payment",
            Self::Payed => "payed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-assigned order identifier, monotonic.
pub type OrderId = i64;

/// An order: a user, its items, and its current lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: i64,
    pub status: OrderStatus,
    pub items: Vec<Item>,
}

/// Closed set of states an outbox row may occupy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, postgres_types::ToSql, postgres_types::FromSql)]
#[postgres(name = "event_status")]
pub enum EventStatus {
    #[serde(rename = "new")]
    #[postgres(name = "new")]
    New,
    #[serde(rename = "sent")]
    #[postgres(name = "sent")]
    Sent,
    #[serde(rename = "error")]
    #[postgres(name = "error")]
    Error,
}

/// One row of the transactional outbox: written in the same transaction as the
/// order-status change it announces, drained by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub status: EventStatus,
}

/// The wire-stable payload body published to the order-event topic:
/// `{"order_id": <int64>, "status": "<string>", "moment": "<RFC3339>"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub status: String,
    pub moment: DateTime<Utc>,
}

impl OrderEvent {
    pub fn new(order_id: OrderId, status: OrderStatus, moment: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: status.as_str().to_string(),
            moment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_event_round_trips_through_json() {
        let moment = Utc::now();
        let event = OrderEvent::new(7, OrderStatus::AwaitingPayment, moment);
        let json = serde_json::to_string(&event).unwrap();
        let decoded: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.order_id, 7);
        assert_eq!(decoded.status, "awaiting payment");
    }

    #[test]
    fn terminal_statuses_are_closed() {
        assert!(OrderStatus::Payed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn stock_available_can_go_negative_for_diagnosis() {
        let stock = Stock {
            sku: 1,
            total_count: 5,
            reserved: 7,
        };
        assert_eq!(stock.available(), -2);
    }
}
