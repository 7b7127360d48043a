//! Business logic layer for LOMS: order lifecycle and stock reservation.
//!
//! Both services are generic over their repository traits, the same pattern
//! the teacher used for its `OrderServiceImpl<R1, R2, R3, R4>` — production
//! wires in the Postgres-backed repositories, tests wire in fakes.

pub mod order;
pub mod stock;

pub use order::{OrderError, OrderServiceImpl};
pub use stock::{StockError, StockServiceImpl};
