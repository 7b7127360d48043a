//! Kafka producer construction shared by anything that publishes to a topic.
//!
//! The outbox dispatcher is the only caller today: it builds one producer per
//! process and hands it the topic/key/payload already sitting in each outbox
//! row.

use anyhow::{Context, Result};
use rdkafka::producer::FutureProducer;
use rdkafka::ClientConfig;
use tracing::info;

/// Builds a `FutureProducer` against the given broker list.
pub fn build_producer(brokers: &[String]) -> Result<FutureProducer> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers.join(","))
        .set("message.timeout.ms", "5000")
        .create()
        .context("failed to create Kafka producer")?;

    info!(brokers = %brokers.join(","), "Kafka producer initialized");
    Ok(producer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_producer_rejects_no_brokers_configured() {
        // rdkafka accepts an empty bootstrap.servers at construction time and
        // only fails once it actually tries to connect, so this just checks
        // that building doesn't panic for the degenerate input.
        let result = build_producer(&[]);
        assert!(result.is_ok());
    }
}
