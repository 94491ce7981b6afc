//! Outbox Repository Trait
//!
//! Persistence interface for outbox records. The transactional insert
//! used by event capture lives on the Postgres implementation (it must
//! share the caller's transaction); this trait covers the publisher
//! side plus a non-transactional insert for tests and tooling.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::{NewOutboxRecord, OutboxRecord};

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a record on its own connection (outside any business
    /// transaction). Event capture goes through
    /// [`crate::postgres::insert_on`] instead.
    async fn insert(&self, record: NewOutboxRecord) -> Result<OutboxRecord>;

    /// Fetch PENDING records for a destination, oldest first.
    async fn fetch_pending(&self, destination: &str, limit: u32) -> Result<Vec<OutboxRecord>>;

    /// Transition records to SENT. Already-sent ids are a no-op.
    async fn mark_sent(&self, ids: &[Uuid]) -> Result<()>;

    /// Create backing storage if it does not exist.
    async fn init_schema(&self) -> Result<()>;
}
