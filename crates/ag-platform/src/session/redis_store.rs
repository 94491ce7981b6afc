//! Redis Session Store
//!
//! Sessions live under `auth_session:<sid>` with a TTL; the per-user
//! index is a set under `user_sessions:<userId>` whose TTL is seeded on
//! first use (`EXPIRE ... NX`) and afterwards only ever extended
//! (`EXPIRE ... GT`) so it outlives its longest member.
//! Unrelated mutations keep the remaining lifetime via `SET ... KEEPTTL`.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::session::record::{SessionRecord, SessionWithSid};
use crate::session::store::{reset_key, session_key, user_index_key, SessionMutator, SessionStore};
use crate::shared::error::Result;

pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// SET ... KEEPTTL; plain SET would reset the remaining lifetime.
    async fn set_keep_ttl(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("KEEPTTL")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, sid: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        let ttl_secs = ttl.as_secs().max(1);

        conn.set_ex::<_, _, ()>(session_key(sid), json, ttl_secs).await?;

        let index = user_index_key(&record.user_id);
        conn.sadd::<_, _, ()>(&index, sid).await?;
        // SADD may have just created the key with no TTL, which GT
        // treats as infinite and refuses to lower. NX seeds the first
        // deadline; GT then only ever extends it, so the index never
        // expires before its last member.
        redis::cmd("EXPIRE")
            .arg(&index)
            .arg(ttl_secs)
            .arg("NX")
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("EXPIRE")
            .arg(&index)
            .arg(ttl_secs)
            .arg("GT")
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn get(&self, sid: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(session_key(sid)).await?;

        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    warn!(sid = %sid, "Unparsable session record: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn update(&self, sid: &str, mutator: SessionMutator) -> Result<bool> {
        let Some(mut record) = self.get(sid).await? else {
            return Ok(false);
        };
        mutator(&mut record);
        self.set_keep_ttl(&session_key(sid), &serde_json::to_string(&record)?)
            .await?;
        Ok(true)
    }

    async fn remove(&self, sid: &str, user_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(session_key(sid)).await?;
        conn.srem::<_, _, ()>(user_index_key(user_id), sid).await?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionWithSid>> {
        let mut conn = self.conn.clone();
        let index = user_index_key(user_id);

        let sids: Vec<String> = conn.smembers(&index).await?;
        if sids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = sids.iter().map(|sid| session_key(sid)).collect();
        let raws: Vec<Option<String>> = conn.mget(&keys).await?;

        let mut sessions = Vec::with_capacity(sids.len());
        for (sid, raw) in sids.into_iter().zip(raws) {
            let parsed = raw.as_deref().and_then(|json| serde_json::from_str(json).ok());
            match parsed {
                Some(record) => sessions.push(SessionWithSid { sid, record }),
                None => {
                    // Expired or corrupt: compact the index lazily.
                    conn.srem::<_, _, ()>(&index, &sid).await?;
                }
            }
        }

        Ok(sessions)
    }

    async fn put_reset_token(&self, token: &str, user_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(&serde_json::json!({ "id": user_id }))?;
        conn.set_ex::<_, _, ()>(reset_key(token), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn take_reset_token(&self, token: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(reset_key(token))
            .query_async(&mut conn)
            .await?;

        Ok(raw
            .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from)))
    }
}
