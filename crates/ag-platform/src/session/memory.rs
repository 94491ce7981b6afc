//! In-memory session store for tests and local development.
//!
//! Mirrors the Redis implementation's semantics: per-key TTLs checked
//! lazily, a per-user index whose deadline is seeded on first use and
//! afterwards only extended, and self-healing listings.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::session::record::{SessionRecord, SessionWithSid};
use crate::session::store::{SessionMutator, SessionStore};
use crate::shared::error::Result;

struct Entry {
    record: SessionRecord,
    expires_at: Instant,
}

struct IndexEntry {
    sids: HashSet<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    index: HashMap<String, IndexEntry>,
    reset_tokens: HashMap<String, (String, Instant)>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a record while leaving its index entry behind, simulating a
    /// TTL expiry the index has not caught up with.
    pub fn evict_record_keep_index(&self, sid: &str) {
        self.inner.lock().sessions.remove(sid);
    }

    /// Whether the user's index still references the session id.
    pub fn index_contains(&self, user_id: &str, sid: &str) -> bool {
        self.inner
            .lock()
            .index
            .get(user_id)
            .is_some_and(|entry| entry.sids.contains(sid))
    }

    /// Remaining lifetime of the user's index, if one exists.
    pub fn index_ttl(&self, user_id: &str) -> Option<Duration> {
        self.inner
            .lock()
            .index
            .get(user_id)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now()))
    }
}

fn live<'a>(sessions: &'a HashMap<String, Entry>, sid: &str) -> Option<&'a Entry> {
    sessions.get(sid).filter(|e| e.expires_at > Instant::now())
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, sid: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sessions.insert(
            sid.to_string(),
            Entry {
                record: record.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        let deadline = Instant::now() + ttl;
        let entry = inner
            .index
            .entry(record.user_id.clone())
            .or_insert_with(|| IndexEntry {
                sids: HashSet::new(),
                expires_at: deadline,
            });
        entry.sids.insert(sid.to_string());
        // Same deadline rule as the Redis index: seed on first use,
        // then extend only.
        if deadline > entry.expires_at {
            entry.expires_at = deadline;
        }
        Ok(())
    }

    async fn get(&self, sid: &str) -> Result<Option<SessionRecord>> {
        let inner = self.inner.lock();
        Ok(live(&inner.sessions, sid).map(|e| e.record.clone()))
    }

    async fn update(&self, sid: &str, mutator: SessionMutator) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.sessions.get_mut(sid) else {
            return Ok(false);
        };
        if entry.expires_at <= Instant::now() {
            return Ok(false);
        }
        mutator(&mut entry.record);
        Ok(true)
    }

    async fn remove(&self, sid: &str, user_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.sessions.remove(sid);
        if let Some(entry) = inner.index.get_mut(user_id) {
            entry.sids.remove(sid);
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionWithSid>> {
        let mut inner = self.inner.lock();
        let Inner { sessions, index, .. } = &mut *inner;

        let Some(entry) = index.get_mut(user_id) else {
            return Ok(Vec::new());
        };
        if entry.expires_at <= Instant::now() {
            index.remove(user_id);
            return Ok(Vec::new());
        }

        let mut result = Vec::new();
        entry.sids.retain(|sid| match live(sessions, sid) {
            Some(entry) => {
                result.push(SessionWithSid {
                    sid: sid.clone(),
                    record: entry.record.clone(),
                });
                true
            }
            None => false,
        });

        Ok(result)
    }

    async fn put_reset_token(&self, token: &str, user_id: &str, ttl: Duration) -> Result<()> {
        self.inner.lock().reset_tokens.insert(
            token.to_string(),
            (user_id.to_string(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn take_reset_token(&self, token: &str) -> Result<Option<String>> {
        let entry = self.inner.lock().reset_tokens.remove(token);
        Ok(entry
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(user_id, _)| user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(user_id: &str) -> SessionRecord {
        SessionRecord {
            user_id: user_id.into(),
            person_id: None,
            email: format!("{user_id}@example.com"),
            permissions: vec![],
            active: true,
            ip: "192.168.1.10".into(),
            user_agent: "test".into(),
            device: "other".into(),
            created_at: Utc::now(),
            last_refresh_at: None,
        }
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn create_get_remove_round_trip() {
        let store = MemorySessionStore::new();
        store.create("s1", &record("u1"), TTL).await.unwrap();

        assert!(store.get("s1").await.unwrap().is_some());
        store.remove("s1", "u1").await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
        assert!(!store.index_contains("u1", "s1"));

        // Second removal is a no-op, not an error.
        store.remove("s1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn deactivate_keeps_the_record_resolvable() {
        let store = MemorySessionStore::new();
        store.create("s1", &record("u1"), TTL).await.unwrap();

        assert!(store.deactivate("s1").await.unwrap());
        let session = store.get("s1").await.unwrap().unwrap();
        assert!(!session.active);

        // Unknown sessions report false rather than erroring.
        assert!(!store.deactivate("missing").await.unwrap());
    }

    #[tokio::test]
    async fn listing_self_heals_dangling_index_entries() {
        let store = MemorySessionStore::new();
        store.create("s1", &record("u1"), TTL).await.unwrap();
        store.create("s2", &record("u1"), TTL).await.unwrap();

        store.evict_record_keep_index("s1");
        assert!(store.index_contains("u1", "s1"));

        let sessions = store.list_by_user("u1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].sid, "s2");
        assert!(!store.index_contains("u1", "s1"));
    }

    #[tokio::test]
    async fn fresh_user_index_gets_a_deadline() {
        let store = MemorySessionStore::new();
        store.create("s1", &record("u1"), TTL).await.unwrap();

        // The first session seeds the index deadline rather than
        // leaving the index immortal.
        let remaining = store.index_ttl("u1").unwrap();
        assert!(remaining > Duration::from_secs(55));
        assert!(remaining <= TTL);
    }

    #[tokio::test]
    async fn index_deadline_only_ever_extends() {
        let store = MemorySessionStore::new();
        store
            .create("s1", &record("u1"), Duration::from_secs(120))
            .await
            .unwrap();

        // A shorter-lived session must not pull the deadline in.
        store
            .create("s2", &record("u1"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(store.index_ttl("u1").unwrap() > Duration::from_secs(100));

        // A longer-lived one pushes it out.
        store
            .create("s3", &record("u1"), Duration::from_secs(300))
            .await
            .unwrap();
        assert!(store.index_ttl("u1").unwrap() > Duration::from_secs(200));
    }

    #[tokio::test]
    async fn reset_tokens_are_single_use() {
        let store = MemorySessionStore::new();
        store.put_reset_token("tok", "u1", TTL).await.unwrap();

        assert_eq!(store.take_reset_token("tok").await.unwrap().as_deref(), Some("u1"));
        assert!(store.take_reset_token("tok").await.unwrap().is_none());
    }
}
