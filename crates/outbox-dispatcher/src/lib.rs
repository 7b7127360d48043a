//! Periodic tick that drains the outbox into Kafka.
//!
//! Mirrors the original's `CronProcessor.Do`: fetch a batch under
//! `FOR UPDATE SKIP LOCKED`, publish each row, and mark successes/failures
//! back in the same transaction so a crash mid-batch never loses a row —
//! unsent rows just stay `new` and get picked up by the next tick, possibly
//! by a different dispatcher instance.

use deadpool_postgres::Pool;
use model::Event;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use repository::{OutboxRepository, RepositoryError};
use std::time::Duration;
use thiserror::Error;
use tokio_postgres::IsolationLevel;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] tokio_postgres::Error),
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] tokio_postgres::Error),
    #[error("producer connection failure: {0}")]
    Producer(#[source] KafkaError),
}

/// Broker-down/transport-level failures mean the whole batch is unsendable,
/// not just the one message that happened to hit the error first — the
/// caller must roll back rather than mark anything `error`.
fn is_catastrophic(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerTransportFailure)
            | Some(RDKafkaErrorCode::NetworkException)
            | Some(RDKafkaErrorCode::OperationTimedOut)
    )
}

pub struct Dispatcher<R> {
    pool: Pool,
    outbox_repo: R,
    producer: FutureProducer,
    batch_size: i64,
    send_timeout: Duration,
}

impl<R> Dispatcher<R>
where
    R: OutboxRepository + Send + Sync,
{
    pub fn new(pool: Pool, outbox_repo: R, producer: FutureProducer, batch_size: i64) -> Self {
        Self {
            pool,
            outbox_repo,
            producer,
            batch_size,
            send_timeout: Duration::from_secs(5),
        }
    }

    /// Drains one batch. Returns the number of rows fetched this tick.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<usize, DispatchError> {
        let mut client = self.pool.get().await.map_err(RepositoryError::from)?;
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::ReadCommitted)
            .start()
            .await
            .map_err(DispatchError::Begin)?;

        let events = self.outbox_repo.fetch_next(&tx, self.batch_size).await?;
        if events.is_empty() {
            tx.commit().await.map_err(DispatchError::Commit)?;
            return Ok(0);
        }

        let (sent, failed) = self.send_batch(&events).await?;

        if !sent.is_empty() {
            self.outbox_repo.mark_as_sent(&tx, &sent).await?;
        }
        if !failed.is_empty() {
            warn!(count = failed.len(), "outbox events failed to publish, marked for retry");
            self.outbox_repo.mark_as_error(&tx, &failed).await?;
        }

        tx.commit().await.map_err(DispatchError::Commit)?;
        info!(fetched = events.len(), sent = sent.len(), failed = failed.len(), "outbox tick complete");
        Ok(events.len())
    }

    /// A per-message rejection (bad payload, unknown topic, queue full) is
    /// recorded against that event and the batch continues. A catastrophic,
    /// whole-connection failure (broker down, transport failure) aborts the
    /// batch immediately so the caller can roll back and leave every row
    /// `new` for the next tick to retry.
    async fn send_batch(&self, events: &[Event]) -> Result<(Vec<i64>, Vec<i64>), DispatchError> {
        let mut sent = Vec::with_capacity(events.len());
        let mut failed = Vec::new();

        for event in events {
            let record = FutureRecord::to(&event.topic).key(&event.key).payload(&event.payload);

            match self.producer.send(record, self.send_timeout).await {
                Ok(_) => sent.push(event.id),
                Err((err, _)) if is_catastrophic(&err) => {
                    error!(event_id = event.id, error = ?err, "catastrophic producer error, aborting batch");
                    return Err(DispatchError::Producer(err));
                }
                Err((err, _)) => {
                    error!(event_id = event.id, error = ?err, "failed to publish outbox event");
                    failed.push(event.id);
                }
            }
        }

        Ok((sent, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_error_wraps_repository_error_transparently() {
        let err = DispatchError::Repository(RepositoryError::OrderNotFound);
        assert_eq!(err.to_string(), "order not found");
    }
}
