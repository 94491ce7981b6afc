//! Session Store Trait
//!
//! Key-value persistence for sessions, the per-user session index, and
//! single-use password-reset keys. All mutations are idempotent; only
//! per-key writes are atomic (the index is an approximation that
//! [`SessionStore::list_by_user`] lazily compacts).

use std::time::Duration;

use async_trait::async_trait;

use crate::session::record::{SessionRecord, SessionWithSid};
use crate::shared::error::Result;

/// Mutation applied inside a read-modify-write [`SessionStore::update`].
pub type SessionMutator = Box<dyn FnOnce(&mut SessionRecord) + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write the session and add it to the owner's index. The index TTL
    /// is extended so it never expires before its longest-lived member.
    async fn create(&self, sid: &str, record: &SessionRecord, ttl: Duration) -> Result<()>;

    async fn get(&self, sid: &str) -> Result<Option<SessionRecord>>;

    /// Read-modify-write preserving the key's remaining TTL. Returns
    /// false when the session does not exist.
    async fn update(&self, sid: &str, mutator: SessionMutator) -> Result<bool>;

    /// Flip `active` off in place, TTL untouched. Returns false when the
    /// session does not exist.
    async fn deactivate(&self, sid: &str) -> Result<bool> {
        self.update(sid, Box::new(|s| s.active = false)).await
    }

    /// Delete the session and drop it from the owner's index. Removing a
    /// session that is already gone is not an error.
    async fn remove(&self, sid: &str, user_id: &str) -> Result<()>;

    /// Resolve the owner's index, bulk-fetch the records, and self-heal:
    /// index entries whose backing record is missing or unparsable are
    /// dropped from the index and skipped.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionWithSid>>;

    /// Store a single-use password-reset token mapping to the user id.
    async fn put_reset_token(&self, token: &str, user_id: &str, ttl: Duration) -> Result<()>;

    /// Atomically fetch and delete a reset token; `None` when unknown,
    /// already used, or expired.
    async fn take_reset_token(&self, token: &str) -> Result<Option<String>>;
}

pub(crate) fn session_key(sid: &str) -> String {
    format!("auth_session:{sid}")
}

pub(crate) fn user_index_key(user_id: &str) -> String {
    format!("user_sessions:{user_id}")
}

pub(crate) fn reset_key(token: &str) -> String {
    format!("reset_password:{token}")
}
