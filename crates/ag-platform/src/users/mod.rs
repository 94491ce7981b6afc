//! Credential store contract
//!
//! The user CRUD lives elsewhere; this core only needs email lookup
//! (with the user's effective permission codes resolved read-only
//! through the role tables) and a save for password resets.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use ag_common::RequestContext;

use crate::audit::{AuditOp, Auditable, ChangeRecorder};
use crate::shared::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub person_id: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    /// Effective permission codes via assigned roles
    pub permission_codes: Vec<String>,
}

impl Auditable for User {
    fn entity_name(&self) -> &'static str {
        "User"
    }

    fn primary_key(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut key = serde_json::Map::new();
        key.insert("id".into(), serde_json::Value::String(self.id.clone()));
        key
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Persist mutable account fields (password hash, active flag),
    /// recording the mutation for the audit stream.
    async fn save(&self, user: &User, ctx: &RequestContext) -> Result<()>;
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresUserRepository {
    pool: PgPool,
    recorder: ChangeRecorder,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool, recorder: ChangeRecorder) -> Self {
        Self { pool, recorder }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT u.id, u.person_id, u.email, u.password_hash, u.active, \
                    COALESCE(ARRAY_AGG(DISTINCT p.code) FILTER (WHERE p.code IS NOT NULL), '{}') AS permission_codes \
             FROM app_user u \
             LEFT JOIN user_role ur ON ur.user_id = u.id \
             LEFT JOIN role_permission rp ON rp.role_id = ur.role_id \
             LEFT JOIN permission p ON p.id = rp.permission_id \
             WHERE u.email = $1 \
             GROUP BY u.id, u.person_id, u.email, u.password_hash, u.active",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            person_id: row.get("person_id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            active: row.get("active"),
            permission_codes: row.get("permission_codes"),
        }))
    }

    async fn save(&self, user: &User, ctx: &RequestContext) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE app_user SET password_hash = $2, active = $3 WHERE id = $1")
            .bind(&user.id)
            .bind(&user.password_hash)
            .bind(user.active)
            .execute(&mut *tx)
            .await?;

        // Audit row rides the same transaction as the update.
        self.recorder
            .record(&mut tx, AuditOp::Updated, user, ctx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests / local development)
// ============================================================================

#[derive(Default)]
pub struct MemoryUserRepository {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.lock().insert(user.email.clone(), user);
    }

    /// Replace a user's permission codes, as the roles service would.
    pub fn set_permissions(&self, email: &str, codes: &[&str]) {
        if let Some(user) = self.users.lock().get_mut(email) {
            user.permission_codes = codes.iter().map(|c| c.to_string()).collect();
        }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.lock().get(email).cloned())
    }

    async fn save(&self, user: &User, _ctx: &RequestContext) -> Result<()> {
        self.users.lock().insert(user.email.clone(), user.clone());
        Ok(())
    }
}
