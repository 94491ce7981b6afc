//! In-memory outbox repository for tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::repository::OutboxRepository;
use crate::{NewOutboxRecord, OutboxRecord, OutboxStatus};

#[derive(Default)]
pub struct MemoryOutboxRepository {
    records: Mutex<Vec<OutboxRecord>>,
}

impl MemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, regardless of status.
    pub fn all(&self) -> Vec<OutboxRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl OutboxRepository for MemoryOutboxRepository {
    async fn insert(&self, record: NewOutboxRecord) -> Result<OutboxRecord> {
        let stored = OutboxRecord {
            id: Uuid::new_v4(),
            destination: record.destination,
            pattern: record.pattern,
            payload: record.payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
        };
        self.records.lock().push(stored.clone());
        Ok(stored)
    }

    async fn fetch_pending(&self, destination: &str, limit: u32) -> Result<Vec<OutboxRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending && r.destination == destination)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, ids: &[Uuid]) -> Result<()> {
        let mut records = self.records.lock();
        for record in records.iter_mut() {
            if ids.contains(&record.id) {
                record.status = OutboxStatus::Sent;
            }
        }
        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}
