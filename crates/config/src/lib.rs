//! Environment-backed configuration for the three binaries in this workspace.
//!
//! Each binary gets its own config struct and `load_*` entry point, following
//! the same `config::Config::builder()` + `set_default` + env-override pattern
//! the teacher uses for its single `AppConfig`, just split three ways since
//! the services no longer share one process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Database connection settings, embedded in `LomsConfig`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DbSettings {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
}

/// Configuration for the `cart-app` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CartConfig {
    /// Port the Cart HTTP API listens on.
    pub http_port: u16,
    /// LOMS gRPC endpoint, e.g. "http://localhost:50051".
    pub loms_addr: String,
    /// Base URL of the external product catalog.
    pub catalog_base_url: String,
    /// Worker cap for bounded-concurrency cart enrichment.
    pub enrichment_workers: usize,
    /// Token-bucket rate limit, requests/sec, for the catalog client.
    pub catalog_rate_limit: u32,
    /// Token-bucket burst capacity for the catalog client.
    pub catalog_rate_burst: u32,
    /// Max sleep-and-retry attempts on HTTP 429/420 from the catalog.
    pub catalog_retry_max: u32,
    /// Per-call timeout applied to catalog and LOMS calls.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub call_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_timeout: Duration,
}

impl CartConfig {
    /// Loads configuration from environment variables (and optionally a `.env` file).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("http_port", 8081)?
            .set_default("loms_addr", "http://localhost:50051")?
            .set_default("catalog_base_url", "http://localhost:8090")?
            .set_default("enrichment_workers", 8)?
            .set_default("catalog_rate_limit", 10)?
            .set_default("catalog_rate_burst", 20)?
            .set_default("catalog_retry_max", 3)?
            .set_default("call_timeout", "3s")?
            .set_default("shutdown_timeout", "10s")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("failed to load cart configuration")
    }
}

/// Configuration for the `loms-app` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LomsConfig {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,
    /// Port the gRPC server listens on.
    pub grpc_port: u16,
    /// Port the admin HTTP surface (/metrics, /health) listens on.
    pub http_port: u16,
    /// Kafka brokers the outbox dispatcher publishes to.
    pub kafka_brokers: Vec<String>,
    /// Topic the outbox dispatcher publishes order-lifecycle events to.
    pub kafka_topic: String,
    /// Interval between outbox dispatcher ticks.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub dispatch_interval: Duration,
    /// Max rows fetched per dispatcher tick.
    pub dispatch_batch_size: i64,
    /// TTL after which a `new` order with no TX2 is swept to `failed`.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub orphan_ttl: Duration,
    /// Interval between orphan-sweeper ticks.
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub orphan_sweep_interval: Duration,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_timeout: Duration,
}

impl LomsConfig {
    pub fn db(&self) -> DbSettings {
        DbSettings {
            db_host: self.db_host.clone(),
            db_port: self.db_port,
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
            db_name: self.db_name.clone(),
        }
    }

    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "loms_user")?
            .set_default("db_password", "securepassword")?
            .set_default("db_name", "loms_db")?
            .set_default("grpc_port", 50051)?
            .set_default("http_port", 8082)?
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("kafka_topic", "order-events")?
            .set_default("dispatch_interval", "2s")?
            .set_default("dispatch_batch_size", 200)?
            .set_default("orphan_ttl", "15m")?
            .set_default("orphan_sweep_interval", "1m")?
            .set_default("shutdown_timeout", "10s")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("failed to load loms configuration")
    }
}

/// Configuration for the `notifier-app` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NotifierConfig {
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub http_port: u16,
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub shutdown_timeout: Duration,
}

impl NotifierConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("kafka_topic", "order-events")?
            .set_default("kafka_group_id", "notifier")?
            .set_default("http_port", 8083)?
            .set_default("shutdown_timeout", "10s")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("failed to load notifier configuration")
    }
}

/// Custom deserializer accepting human-friendly durations like "5s", "1m".
fn deserialize_duration_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val).map_err(|e| D::Error::custom(format!("invalid duration '{val}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loms_config_has_sane_defaults() {
        let cfg = LomsConfig::load().unwrap();
        assert_eq!(cfg.grpc_port, 50051);
        assert_eq!(cfg.dispatch_batch_size, 200);
    }

    #[test]
    fn cart_config_has_sane_defaults() {
        let cfg = CartConfig::load().unwrap();
        assert_eq!(cfg.enrichment_workers, 8);
        assert_eq!(cfg.catalog_rate_limit, 10);
    }
}
