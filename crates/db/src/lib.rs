//! Database initialization and migration logic for LOMS.
//!
//! Provides `init_db_pool` for creating a connection pool against the LOMS
//! database and auto-applying SQL migrations from the migrations directory.

use anyhow::{Context, Result};
use app_config::DbSettings;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Initializes the database connection pool and runs migrations.
///
/// # Errors
/// Returns an error if the pool cannot be created or migrations fail.
pub async fn init_db_pool(cfg: &DbSettings) -> Result<Pool> {
    let dsn = format!(
        "host={} port={} user={} password={} dbname={} sslmode=disable",
        cfg.db_host, cfg.db_port, cfg.db_user, cfg.db_password, cfg.db_name
    );

    let pg_config: PgConfig = dsn.parse().context("failed to parse Postgres DSN")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(16)
        .runtime(Runtime::Tokio1)
        .build()
        .context("failed to create database pool")?;

    let max_retries = 5;
    let mut retry_count = 0;
    let mut last_error = None;

    while retry_count < max_retries {
        match pool.get().await {
            Ok(client) => {
                info!(retry_count, "connected to database");

                let migrations_paths = ["./migrations", "/app/migrations"];
                let mut migrations_found = false;

                for migrations_dir in migrations_paths {
                    if tokio::fs::metadata(migrations_dir).await.is_ok() {
                        info!(migrations_dir, "applying migrations");
                        run_migrations(&client, migrations_dir).await?;
                        migrations_found = true;
                        break;
                    }
                }

                if !migrations_found {
                    info!("no migrations directory found, skipping");
                }
                return Ok(pool);
            }
            Err(e) => {
                retry_count += 1;
                last_error = Some(e);
                info!(retry_count, max_retries, "db connect failed, retrying in 1s");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to get DB connection after {max_retries} retries: {:?}",
        last_error.unwrap()
    ))
}

/// Applies all SQL migrations from the given directory, in filename order.
///
/// # Errors
/// Returns an error if migration files cannot be read or applied.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .context("failed to read migrations directory")?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        info!(file_name, "applying migration");
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("failed to execute migration {file_name}"))?;
    }
    Ok(())
}
