//! Authgate Outbox
//!
//! At-least-once delivery of audit events: records are written in the
//! same database transaction as the business change they describe, then
//! drained to the message broker by a polling publisher. A failed
//! publish leaves the record PENDING for the next cycle; a successful
//! one transitions it to SENT exactly once.

pub mod amqp;
pub mod memory;
pub mod postgres;
pub mod repository;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

pub use amqp::{AmqpPublisher, AmqpPublisherConfig};
pub use memory::MemoryOutboxRepository;
pub use postgres::PostgresOutboxRepository;
pub use repository::OutboxRepository;

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    // Declared for parity with the stored enum; no code path assigns it
    // today (rows are retried indefinitely, see DESIGN.md).
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(OutboxStatus::Pending),
            "SENT" => Some(OutboxStatus::Sent),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// A to-be-published event, before it has an id or status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxRecord {
    /// Logical queue name, e.g. `audit_queue`
    pub destination: String,
    /// Routing key, e.g. `user_created`
    pub pattern: String,
    pub payload: serde_json::Value,
}

/// A persisted outbox row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub destination: String,
    pub pattern: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Broker seam
// ============================================================================

/// Fire-and-forget publish to the message broker. Failures surface as
/// errors and are handled per-record by the publisher loop.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn emit(&self, pattern: &str, payload: &serde_json::Value) -> Result<()>;
}

// ============================================================================
// Polling publisher
// ============================================================================

pub struct OutboxPublisher {
    repository: Arc<dyn OutboxRepository>,
    broker: Arc<dyn BrokerPublisher>,
    destination: String,
    poll_interval: Duration,
    batch_size: u32,
}

impl OutboxPublisher {
    pub fn new(
        repository: Arc<dyn OutboxRepository>,
        broker: Arc<dyn BrokerPublisher>,
        destination: impl Into<String>,
        poll_interval: Duration,
        batch_size: u32,
    ) -> Self {
        Self {
            repository,
            broker,
            destination: destination.into(),
            poll_interval,
            batch_size,
        }
    }

    /// Run the drain loop until the task is dropped.
    pub async fn start(&self) {
        info!(
            destination = %self.destination,
            poll_interval_ms = %self.poll_interval.as_millis(),
            batch_size = %self.batch_size,
            "Starting outbox publisher"
        );

        loop {
            if let Err(e) = self.run_cycle().await {
                error!("Outbox cycle failed: {}", e);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One poll cycle: fetch PENDING records and emit each. A publish
    /// failure is logged and leaves that record PENDING; it never aborts
    /// the rest of the batch. Returns the number of records sent.
    pub async fn run_cycle(&self) -> Result<usize> {
        let pending = self
            .repository
            .fetch_pending(&self.destination, self.batch_size)
            .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        debug!(count = pending.len(), "Draining outbox records");

        let mut sent_ids = Vec::with_capacity(pending.len());
        for record in &pending {
            match self.broker.emit(&record.pattern, &record.payload).await {
                Ok(()) => sent_ids.push(record.id),
                Err(e) => {
                    error!(id = %record.id, pattern = %record.pattern, "Failed to publish outbox record: {}", e);
                }
            }
        }

        if !sent_ids.is_empty() {
            self.repository.mark_sent(&sent_ids).await?;
        }

        Ok(sent_ids.len())
    }
}
