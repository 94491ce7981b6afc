//! API Key Authentication
//!
//! Machine callers authenticate with an `X-Api-Key` header. Keys are
//! stored Argon2-hashed, so validation scans every active key and
//! verifies the presented secret against each hash; first match wins.
//! All failures collapse into the single `API_KEY_INVALID` code.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ag_common::{AuthIdentity, RequestContext};

use crate::audit::{AuditOp, Auditable, ChangeRecorder};
use crate::auth::password::PasswordService;
use crate::shared::error::{PlatformError, Result};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: String,
    /// Human-readable name of the calling system
    pub client: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub active: bool,
    pub permission_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Auditable for ApiKeyRecord {
    fn entity_name(&self) -> &'static str {
        "ApiKey"
    }

    fn primary_key(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut key = serde_json::Map::new();
        key.insert("id".into(), serde_json::Value::String(self.id.clone()));
        key
    }
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>>;

    async fn insert(&self, record: &ApiKeyRecord, ctx: &RequestContext) -> Result<()>;

    async fn set_active(&self, id: &str, active: bool, ctx: &RequestContext) -> Result<()>;
}

// ============================================================================
// Guard
// ============================================================================

pub struct ApiKeyGuard {
    repository: Arc<dyn ApiKeyRepository>,
    passwords: Arc<PasswordService>,
}

impl ApiKeyGuard {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, passwords: Arc<PasswordService>) -> Self {
        Self { repository, passwords }
    }

    /// Validate an `X-Api-Key` header value and check route permissions.
    pub async fn check(&self, header: Option<&str>, required: &[&str]) -> Result<AuthIdentity> {
        let presented = header.ok_or(PlatformError::ApiKeyInvalid)?;

        for record in self.repository.list_active().await? {
            if self
                .passwords
                .verify_password(presented, &record.key_hash)
                .unwrap_or(false)
            {
                let identity = AuthIdentity {
                    id: record.id,
                    person_id: None,
                    email: record.client,
                    session_id: None,
                    permissions: record.permission_codes,
                };

                if !identity.has_any_permission(required) {
                    return Err(PlatformError::InsufficientPermissions);
                }
                return Ok(identity);
            }
        }

        Err(PlatformError::ApiKeyInvalid)
    }
}

/// Extractor for machine routes: authenticates the request by its
/// `X-Api-Key` header and publishes a [`ag_common::RequestContext`] for
/// audit capture, mirroring the session-based `Authenticated` extractor.
pub struct ApiKeyAuthenticated(pub AuthIdentity);

impl std::ops::Deref for ApiKeyAuthenticated {
    type Target = AuthIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for ApiKeyAuthenticated
where
    S: Send + Sync,
{
    type Rejection = PlatformError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self> {
        let guard_state = parts
            .extensions
            .get::<crate::auth::guard::GuardState>()
            .cloned()
            .ok_or_else(|| PlatformError::internal("API key guard not configured"))?;

        let header = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());

        let identity = guard_state.api_keys.check(header, &[]).await?;

        parts
            .extensions
            .insert(ag_common::RequestContext::authenticated(identity.clone()));

        Ok(ApiKeyAuthenticated(identity))
    }
}

// ============================================================================
// Issuance
// ============================================================================

/// A freshly created key. The plaintext secret is only ever available
/// here; the store keeps the hash.
#[derive(Debug, Serialize)]
pub struct IssuedApiKey {
    pub id: String,
    pub client: String,
    pub key: String,
}

pub struct ApiKeyService {
    repository: Arc<dyn ApiKeyRepository>,
    passwords: Arc<PasswordService>,
}

impl ApiKeyService {
    pub fn new(repository: Arc<dyn ApiKeyRepository>, passwords: Arc<PasswordService>) -> Self {
        Self { repository, passwords }
    }

    /// Generate a 256-bit random secret, store its hash, and return the
    /// plaintext once.
    pub async fn create(
        &self,
        client: &str,
        permission_codes: Vec<String>,
        ctx: &RequestContext,
    ) -> Result<IssuedApiKey> {
        let mut secret = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret);
        let key = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret);

        let record = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            client: client.to_string(),
            key_hash: self.passwords.hash_password(&key)?,
            active: true,
            permission_codes,
            created_at: Utc::now(),
        };
        self.repository.insert(&record, ctx).await?;

        Ok(IssuedApiKey {
            id: record.id,
            client: record.client,
            key,
        })
    }

    /// Deactivating an already inactive key is a no-op.
    pub async fn deactivate(&self, id: &str, ctx: &RequestContext) -> Result<()> {
        if self.repository.find_by_id(id).await?.is_none() {
            return Err(PlatformError::not_found("ApiKey", id));
        }
        self.repository.set_active(id, false, ctx).await
    }
}

// ============================================================================
// Postgres implementation
// ============================================================================

pub struct PostgresApiKeyRepository {
    pool: PgPool,
    recorder: ChangeRecorder,
}

impl PostgresApiKeyRepository {
    pub fn new(pool: PgPool, recorder: ChangeRecorder) -> Self {
        Self { pool, recorder }
    }

    fn parse_row(row: &sqlx::postgres::PgRow) -> ApiKeyRecord {
        ApiKeyRecord {
            id: row.get("id"),
            client: row.get("client"),
            key_hash: row.get("key_hash"),
            active: row.get("active"),
            permission_codes: row.get("permission_codes"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>> {
        let rows = sqlx::query(
            "SELECT id, client, key_hash, active, permission_codes, created_at \
             FROM api_key WHERE active = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        let row = sqlx::query(
            "SELECT id, client, key_hash, active, permission_codes, created_at \
             FROM api_key WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn insert(&self, record: &ApiKeyRecord, ctx: &RequestContext) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO api_key (id, client, key_hash, active, permission_codes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&record.id)
        .bind(&record.client)
        .bind(&record.key_hash)
        .bind(record.active)
        .bind(&record.permission_codes)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        self.recorder
            .record(&mut tx, AuditOp::Created, record, ctx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool, ctx: &RequestContext) -> Result<()> {
        let Some(mut record) = self.find_by_id(id).await? else {
            return Ok(());
        };
        record.active = active;

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE api_key SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&mut *tx)
            .await?;

        self.recorder
            .record(&mut tx, AuditOp::Updated, &record, ctx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation (tests / local development)
// ============================================================================

#[derive(Default)]
pub struct MemoryApiKeyRepository {
    keys: Mutex<Vec<ApiKeyRecord>>,
}

impl MemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for MemoryApiKeyRepository {
    async fn list_active(&self) -> Result<Vec<ApiKeyRecord>> {
        Ok(self
            .keys
            .lock()
            .iter()
            .filter(|k| k.active)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self.keys.lock().iter().find(|k| k.id == id).cloned())
    }

    async fn insert(&self, record: &ApiKeyRecord, _ctx: &RequestContext) -> Result<()> {
        self.keys.lock().push(record.clone());
        Ok(())
    }

    async fn set_active(&self, id: &str, active: bool, _ctx: &RequestContext) -> Result<()> {
        if let Some(key) = self.keys.lock().iter_mut().find(|k| k.id == id) {
            key.active = active;
        }
        Ok(())
    }
}
