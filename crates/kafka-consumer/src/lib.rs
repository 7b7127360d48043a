//! Kafka consumer-group loop for the order-event topic, dispatching each
//! decoded transition to a handler.
//!
//! The handler is a log sink by default — no persistence layer sits behind
//! the notifier — but the dispatch point is a trait so a future handler
//! (email, push, whatever actually reads these events) can be swapped in
//! without touching the consume loop.

use anyhow::Result;
use model::OrderEvent;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

pub trait NotificationHandler: Send + Sync {
    fn handle(&self, event: &OrderEvent);
}

/// The default, spec-mandated handler: log the transition and nothing else.
pub struct LogSink;

impl NotificationHandler for LogSink {
    fn handle(&self, event: &OrderEvent) {
        info!(order_id = event.order_id, status = %event.status, moment = %event.moment, "order status changed");
    }
}

pub struct KafkaConsumer<H: NotificationHandler + 'static> {
    consumer: StreamConsumer,
    handler: Arc<H>,
}

impl<H: NotificationHandler + 'static> KafkaConsumer<H> {
    pub fn new(brokers: &[String], topic: &str, group_id: &str, handler: Arc<H>) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group_id)
            .set("partition.assignment.strategy", "roundrobin")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .create()?;

        consumer.subscribe(&[topic])?;
        Ok(Self { consumer, handler })
    }

    /// Runs the consume loop until `shutdown` is notified or the broker
    /// connection ends the stream.
    pub async fn run(&self, shutdown: Arc<tokio::sync::Notify>) -> Result<()> {
        let mut stream = self.consumer.stream();

        loop {
            tokio::select! {
                maybe_msg = stream.next() => {
                    match maybe_msg {
                        Some(Ok(msg)) => self.handle_message(&msg),
                        Some(Err(e)) => error!(error = %e, "Kafka consumer error"),
                        None => {
                            debug!("Kafka stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("notifier consumer received shutdown signal");
                    break;
                }
            }
        }
        Ok(())
    }

    /// A decode error is a poison pill: log it and move on rather than
    /// getting stuck retrying the same offset forever.
    fn handle_message(&self, msg: &rdkafka::message::BorrowedMessage<'_>) {
        let Some(payload) = msg.payload() else {
            warn!(offset = msg.offset(), "order-event message had no payload");
            return;
        };

        match serde_json::from_slice::<OrderEvent>(payload) {
            Ok(event) => self.handler.handle(&event),
            Err(e) => warn!(offset = msg.offset(), error = %e, "failed to decode order event, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::OrderStatus;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<OrderEvent>>);

    impl NotificationHandler for RecordingSink {
        fn handle(&self, event: &OrderEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn log_sink_handles_without_panicking() {
        let sink = LogSink;
        sink.handle(&OrderEvent::new(1, OrderStatus::Payed, Utc::now()));
    }

    #[test]
    fn recording_sink_captures_dispatched_events() {
        let sink = RecordingSink(Mutex::new(Vec::new()));
        sink.handle(&OrderEvent::new(42, OrderStatus::Cancelled, Utc::now()));
        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].order_id, 42);
    }
}
