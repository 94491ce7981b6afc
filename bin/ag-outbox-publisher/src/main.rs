//! Authgate Outbox Publisher
//!
//! Standalone drain process for deployments that run the publisher
//! separately from the API server. Reads PENDING audit records from the
//! outbox table and emits them to the broker.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DATABASE_URL` | - | Postgres connection URL (required) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` | Postgres pool size |
//! | `RABBITMQ_URL` | - | AMQP connection URI (required) |
//! | `AUDIT_QUEUE` | `audit_queue` | Audit event queue name |
//! | `OUTBOX_POLL_INTERVAL` | `10s` | Drain interval |
//! | `OUTBOX_BATCH_SIZE` | `100` | Records per cycle |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

use ag_config::parse_duration;
use ag_outbox::{AmqpPublisher, AmqpPublisherConfig, OutboxPublisher, PostgresOutboxRepository};
use ag_outbox::repository::OutboxRepository;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{} environment variable is required", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    ag_common::logging::init_logging("ag-outbox-publisher");

    info!("Starting Authgate outbox publisher");

    // This process only needs the database and broker slices of the
    // configuration, so it reads them directly instead of requiring the
    // full server environment (JWT secrets in particular).
    let database_url = env_required("DATABASE_URL")?;
    let broker_url = env_required("RABBITMQ_URL")?;
    let audit_queue = env_or("AUDIT_QUEUE", "audit_queue");
    let poll_interval = parse_duration(&env_or("OUTBOX_POLL_INTERVAL", "10s"))
        .map_err(|e| anyhow::anyhow!("OUTBOX_POLL_INTERVAL: {e}"))?;
    let batch_size: u32 = env_or("OUTBOX_BATCH_SIZE", "100").parse()?;
    let max_connections: u32 = env_or("DATABASE_MAX_CONNECTIONS", "10").parse()?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;
    let repository = Arc::new(PostgresOutboxRepository::new(pool));
    repository.init_schema().await?;
    info!("Postgres outbox repository initialized");

    let broker = Arc::new(
        AmqpPublisher::new(AmqpPublisherConfig::new(&broker_url, &audit_queue)).await?,
    );
    info!(queue = %audit_queue, "AMQP publisher connected");

    let publisher = OutboxPublisher::new(
        repository,
        broker,
        audit_queue,
        poll_interval,
        batch_size,
    );

    tokio::select! {
        _ = publisher.start() => {}
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    info!("Authgate outbox publisher shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
