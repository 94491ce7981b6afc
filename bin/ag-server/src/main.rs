//! Authgate Server
//!
//! Wires configuration, Postgres, Redis, the AMQP publisher and the HTTP
//! router into one process, with the outbox drain loop running embedded.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HOST` | `0.0.0.0` | HTTP bind address |
//! | `PORT` | `3000` | HTTP port |
//! | `DATABASE_URL` | - | Postgres connection URL (required) |
//! | `DATABASE_MAX_CONNECTIONS` | `10` | Postgres pool size |
//! | `REDIS_URL` | - | Redis connection URL (required) |
//! | `RABBITMQ_URL` | - | AMQP connection URI (required) |
//! | `AUDIT_QUEUE` | `audit_queue` | Audit event queue name |
//! | `JWT_AUTH_SECRET` | - | Access token secret, min 32 chars (required) |
//! | `JWT_AUTH_EXPIRES_IN` | - | Access token lifetime, e.g. `1d` (required) |
//! | `JWT_REFRESH_SECRET` | - | Refresh token secret (required) |
//! | `JWT_REFRESH_EXPIRES_IN` | - | Refresh token lifetime (required) |
//! | `JWT_REFRESH_RENEW_THRESHOLD_MINUTES` | `20` | Rotation threshold |
//! | `JWT_RESET_PASSWORD_SECRET` | - | Reset token secret (required) |
//! | `RESET_PASSWORD_EXPIRES_IN` | - | Reset token lifetime (required) |
//! | `OUTBOX_POLL_INTERVAL` | `10s` | Outbox drain interval |
//! | `OUTBOX_BATCH_SIZE` | `100` | Records per drain cycle |
//! | `RUST_LOG` | `info` | Log level |

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

use ag_config::AppConfig;
use ag_outbox::{AmqpPublisher, AmqpPublisherConfig, OutboxPublisher, PostgresOutboxRepository};
use ag_outbox::repository::OutboxRepository;
use ag_platform::audit::ChangeRecorder;
use ag_platform::auth::{
    ApiKeyGuard, ApiKeyService, ApiState, Argon2Config, AuthLayer, AuthService, GuardState,
    LoggingResetMailer, PasswordService, PostgresApiKeyRepository, SessionGuard,
};
use ag_platform::session::RedisSessionStore;
use ag_platform::token::TokenService;
use ag_platform::users::PostgresUserRepository;

#[tokio::main]
async fn main() -> Result<()> {
    ag_common::logging::init_logging("ag-server");

    let config = AppConfig::from_env()?;
    info!("Starting Authgate server");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let outbox_repo = Arc::new(PostgresOutboxRepository::new(pool.clone()));
    outbox_repo.init_schema().await?;
    info!("Postgres connected");

    let sessions = Arc::new(RedisSessionStore::connect(&config.redis.url).await?);
    info!("Redis session store connected");

    let broker = Arc::new(
        AmqpPublisher::new(AmqpPublisherConfig::new(
            &config.broker.url,
            &config.broker.audit_queue,
        ))
        .await?,
    );
    info!(queue = %config.broker.audit_queue, "AMQP publisher connected");

    let tokens = Arc::new(TokenService::new(config.jwt.clone()));
    let passwords = Arc::new(PasswordService::new(Argon2Config::default()));
    let recorder = ChangeRecorder::new(config.broker.audit_queue.clone());
    let users = Arc::new(PostgresUserRepository::new(pool.clone(), recorder.clone()));
    let api_keys = Arc::new(PostgresApiKeyRepository::new(pool.clone(), recorder));

    let auth_service = Arc::new(AuthService::new(
        users,
        sessions.clone(),
        tokens.clone(),
        passwords.clone(),
        Arc::new(LoggingResetMailer),
        &config.jwt,
    ));
    let api_key_service = Arc::new(ApiKeyService::new(api_keys.clone(), passwords.clone()));
    let api_key_guard = Arc::new(ApiKeyGuard::new(api_keys, passwords));
    let guard = Arc::new(SessionGuard::new(tokens, sessions));

    // Embedded outbox drain loop
    let publisher = OutboxPublisher::new(
        outbox_repo,
        broker,
        config.broker.audit_queue.clone(),
        config.outbox.poll_interval,
        config.outbox.batch_size,
    );
    let publisher_handle = tokio::spawn(async move { publisher.start().await });

    let app = ag_platform::auth::router(ApiState {
        auth_service,
        api_key_service,
    })
    .layer(AuthLayer::new(GuardState {
        guard,
        api_keys: api_key_guard,
    }));

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    publisher_handle.abort();
    info!("Authgate server shutdown complete");
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
