//! PostgreSQL Outbox Repository
//!
//! The insert used by event capture takes any `PgExecutor` so it can run
//! on the business write's open transaction; everything else runs on the
//! pool.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::repository::OutboxRepository;
use crate::{NewOutboxRecord, OutboxRecord, OutboxStatus};

const TABLE: &str = "outbox";

/// Insert an outbox record on the given executor.
///
/// Pass the open business transaction here: the outbox row must commit
/// or roll back together with the write it describes.
pub async fn insert_on<'e, E>(executor: E, record: &NewOutboxRecord) -> Result<Uuid>
where
    E: PgExecutor<'e>,
{
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO outbox (id, destination, pattern, payload, status, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(&record.destination)
    .bind(&record.pattern)
    .bind(&record.payload)
    .bind(OutboxStatus::Pending.as_str())
    .bind(Utc::now())
    .execute(executor)
    .await?;

    debug!(id = %id, pattern = %record.pattern, "Outbox record inserted");
    Ok(id)
}

pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn parse_row(row: &PgRow) -> Result<OutboxRecord> {
        let status: String = row.get("status");
        let status = OutboxStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("Unknown outbox status: {status}"))?;
        let created_at: DateTime<Utc> = row.get("created_at");

        Ok(OutboxRecord {
            id: row.get("id"),
            destination: row.get("destination"),
            pattern: row.get("pattern"),
            payload: row.get("payload"),
            status,
            created_at,
        })
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn insert(&self, record: NewOutboxRecord) -> Result<OutboxRecord> {
        let id = insert_on(&self.pool, &record).await?;
        Ok(OutboxRecord {
            id,
            destination: record.destination,
            pattern: record.pattern,
            payload: record.payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
        })
    }

    async fn fetch_pending(&self, destination: &str, limit: u32) -> Result<Vec<OutboxRecord>> {
        let rows = sqlx::query(
            "SELECT id, destination, pattern, payload, status, created_at \
             FROM outbox WHERE status = $1 AND destination = $2 \
             ORDER BY created_at ASC LIMIT $3",
        )
        .bind(OutboxStatus::Pending.as_str())
        .bind(destination)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(Self::parse_row(row)?);
        }

        debug!(table = TABLE, count = records.len(), "Fetched pending outbox records");
        Ok(records)
    }

    async fn mark_sent(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE outbox SET status = $1 WHERE id = ANY($2)")
            .bind(OutboxStatus::Sent.as_str())
            .bind(ids)
            .execute(&self.pool)
            .await?;

        debug!(count = ids.len(), "Marked outbox records SENT");
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS outbox (
                id UUID PRIMARY KEY,
                destination TEXT NOT NULL,
                pattern TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_pending \
             ON outbox (destination, created_at) WHERE status = 'PENDING'",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
