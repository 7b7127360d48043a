//! Transaction boundary helper for LOMS's two-phase order lifecycle.
//!
//! The original system propagates a transaction handle through a
//! request-scoped context key so repositories can discover it without an
//! explicit parameter. Rust's borrow checker makes that shape awkward: a
//! `tokio_postgres::Transaction<'_>` borrows its connection, so stashing one
//! behind a type-erased context value either needs unsafe lifetime games or
//! an `Arc<Mutex<..>>` indirection that defeats the point. Every business
//! operation that needs a transaction in this workspace (`Create`, `Pay`,
//! `Cancel`, the dispatcher tick) is a single async function, so the simpler
//! and equally correct shape is to hand that function an owned `Transaction`
//! and let it pass `&Transaction` into repository calls directly — the same
//! pattern the teacher's `OrderServiceImpl::save_order` already uses.
//!
//! `read_committed` is what remains of the original `TxManager`: begin at
//! `READ COMMITTED`, run the closure, commit on `Ok`, roll back on `Err`.

use deadpool_postgres::{Client, Transaction};
use thiserror::Error;
use tokio_postgres::IsolationLevel;

#[derive(Debug, Error)]
pub enum TxError<E> {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] tokio_postgres::Error),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] tokio_postgres::Error),
    #[error(transparent)]
    Body(E),
}

/// Runs `body` inside a single READ COMMITTED transaction taken from `client`.
/// Commits on `Ok`, rolls back (via `Transaction`'s drop guard) on `Err`.
pub async fn read_committed<'a, F, Fut, T, E>(
    client: &'a mut Client,
    body: F,
) -> Result<T, TxError<E>>
where
    F: FnOnce(Transaction<'a>) -> Fut,
    Fut: std::future::Future<Output = Result<(T, Transaction<'a>), E>>,
{
    let tx = client
        .build_transaction()
        .isolation_level(IsolationLevel::ReadCommitted)
        .start()
        .await
        .map_err(TxError::Begin)?;

    match body(tx).await {
        Ok((value, tx)) => {
            tx.commit().await.map_err(TxError::Commit)?;
            Ok(value)
        }
        Err(e) => Err(TxError::Body(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_error_wraps_body_error_transparently() {
        let err: TxError<&str> = TxError::Body("boom");
        assert_eq!(err.to_string(), "boom");
    }
}
