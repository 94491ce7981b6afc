//! Session Guard
//!
//! Validates `Authorization: Bearer` requests against the session store.
//! The checks run in a fixed order and the first failure wins, each with
//! its own error code: header, token signature, session resolution,
//! session active flag, token/session identity match, subnet binding,
//! then route permissions. A request that passes gets an
//! [`AuthIdentity`] snapshotted from the session record.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
    response::Response,
};
use tower::{Layer, Service};

use ag_common::{AuthIdentity, RequestContext};

use crate::session::SessionStore;
use crate::shared::error::{PlatformError, Result};
use crate::shared::net::{client_ip, same_subnet};
use crate::token::{TokenClass, TokenService};

/// Extract the token from an `Authorization` header value. The scheme
/// comparison is case-insensitive.
pub fn extract_bearer_token(header: &str) -> Result<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(PlatformError::AuthHeaderMalformed),
    }
}

pub struct SessionGuard {
    tokens: Arc<TokenService>,
    sessions: Arc<dyn SessionStore>,
}

impl SessionGuard {
    pub fn new(tokens: Arc<TokenService>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { tokens, sessions }
    }

    /// Run the full check sequence for one request.
    pub async fn check(
        &self,
        auth_header: Option<&str>,
        client_ip: &str,
        required: &[&str],
    ) -> Result<AuthIdentity> {
        let header = auth_header.ok_or(PlatformError::AuthHeaderMissing)?;
        let token = extract_bearer_token(header)?;

        let claims = self.tokens.verify(token, TokenClass::Auth)?;

        // Tokens without a sid fall back to the raw token string as the
        // session key; such sessions exist only when created that way.
        let session_key = claims.sid.as_deref().unwrap_or(token);
        let session = self
            .sessions
            .get(session_key)
            .await?
            .ok_or(PlatformError::SessionNotFound)?;

        if !session.active {
            return Err(PlatformError::SessionInactive);
        }
        if session.email != claims.email {
            return Err(PlatformError::SessionIdentityMismatch);
        }
        if !same_subnet(client_ip, &session.ip) {
            return Err(PlatformError::SessionIpMismatch);
        }

        let identity = AuthIdentity {
            id: session.user_id,
            person_id: session.person_id,
            email: session.email,
            session_id: Some(session_key.to_string()),
            permissions: session.permissions,
        };

        if !identity.has_any_permission(required) {
            return Err(PlatformError::InsufficientPermissions);
        }

        Ok(identity)
    }
}

/// Route-level permission check, applied by handlers after the
/// [`Authenticated`] extractor has established the identity.
pub fn require_any_permission(identity: &AuthIdentity, required: &[&str]) -> Result<()> {
    if identity.has_any_permission(required) {
        Ok(())
    } else {
        Err(PlatformError::InsufficientPermissions)
    }
}

// ============================================================================
// Axum integration
// ============================================================================

/// Shared guards injected into request extensions by [`AuthLayer`].
#[derive(Clone)]
pub struct GuardState {
    pub guard: Arc<SessionGuard>,
    pub api_keys: Arc<crate::auth::api_key::ApiKeyGuard>,
}

/// Extractor that runs the session guard for the request and exposes
/// the resulting identity. Also stores a [`RequestContext`] in the
/// request extensions for downstream audit capture.
pub struct Authenticated(pub AuthIdentity);

impl std::ops::Deref for Authenticated {
    type Target = AuthIdentity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = PlatformError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let guard_state = parts
            .extensions
            .get::<GuardState>()
            .cloned()
            .ok_or_else(|| PlatformError::internal("Session guard not configured"))?;

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = client_ip(&parts.headers, peer);

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let identity = guard_state.guard.check(auth_header, &ip, &[]).await?;

        parts
            .extensions
            .insert(RequestContext::authenticated(identity.clone()));

        Ok(Authenticated(identity))
    }
}

/// Layer that makes [`GuardState`] available to the extractor.
#[derive(Clone)]
pub struct AuthLayer {
    state: GuardState,
}

impl AuthLayer {
    pub fn new(state: GuardState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    state: GuardState,
}

impl<S, B> Service<axum::http::Request<B>> for AuthMiddleware<S>
where
    S: Service<axum::http::Request<B>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: axum::http::Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.state.clone());

        let future = self.inner.call(req);
        Box::pin(async move { future.await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_config::{JwtConfig, TokenClassConfig};
    use chrono::Utc;
    use std::time::Duration;

    use crate::session::{MemorySessionStore, SessionRecord};

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            auth: TokenClassConfig {
                secret: "auth-secret-0123456789abcdef0123456789".into(),
                expires_in: Duration::from_secs(3600),
            },
            refresh: TokenClassConfig {
                secret: "refresh-secret-0123456789abcdef01234567".into(),
                expires_in: Duration::from_secs(86_400),
            },
            reset_password: TokenClassConfig {
                secret: "reset-secret-0123456789abcdef0123456789".into(),
                expires_in: Duration::from_secs(900),
            },
            refresh_renew_threshold_minutes: 20,
        }
    }

    fn session(email: &str, ip: &str, perms: &[&str]) -> SessionRecord {
        SessionRecord {
            user_id: "u-1".into(),
            person_id: None,
            email: email.into(),
            permissions: perms.iter().map(|p| p.to_string()).collect(),
            active: true,
            ip: ip.into(),
            user_agent: "test".into(),
            device: "other".into(),
            created_at: Utc::now(),
            last_refresh_at: None,
        }
    }

    async fn guard_with_session(
        record: &SessionRecord,
    ) -> (SessionGuard, Arc<MemorySessionStore>, String) {
        let tokens = Arc::new(TokenService::new(jwt_config()));
        let store = Arc::new(MemorySessionStore::new());
        store
            .create("sid-1", record, Duration::from_secs(60))
            .await
            .unwrap();
        let token = tokens
            .issue(&record.email, Some("sid-1"), TokenClass::Auth)
            .unwrap();
        let guard = SessionGuard::new(tokens, store.clone());
        (guard, store, format!("Bearer {token}"))
    }

    #[tokio::test]
    async fn happy_path_yields_the_session_identity() {
        let record = session("u@example.com", "192.168.1.10", &["USERS_READ"]);
        let (guard, _store, header) = guard_with_session(&record).await;

        let identity = guard
            .check(Some(&header), "192.168.1.200", &[])
            .await
            .unwrap();
        assert_eq!(identity.id, "u-1");
        assert_eq!(identity.session_id.as_deref(), Some("sid-1"));
        assert_eq!(identity.permissions, vec!["USERS_READ"]);
    }

    #[tokio::test]
    async fn missing_and_malformed_headers_are_distinct() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let (guard, _store, _header) = guard_with_session(&record).await;

        assert!(matches!(
            guard.check(None, "192.168.1.10", &[]).await,
            Err(PlatformError::AuthHeaderMissing)
        ));
        assert!(matches!(
            guard.check(Some("Token abc"), "192.168.1.10", &[]).await,
            Err(PlatformError::AuthHeaderMalformed)
        ));
        assert!(matches!(
            guard.check(Some("Bearer"), "192.168.1.10", &[]).await,
            Err(PlatformError::AuthHeaderMalformed)
        ));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(extract_bearer_token("bearer abc").unwrap(), "abc");
        assert_eq!(extract_bearer_token("BEARER abc").unwrap(), "abc");
        assert!(extract_bearer_token("Bearer a b").is_err());
    }

    #[tokio::test]
    async fn garbage_token_fails_verification() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let (guard, _store, _header) = guard_with_session(&record).await;

        assert!(matches!(
            guard
                .check(Some("Bearer not-a-jwt"), "192.168.1.10", &[])
                .await,
            Err(PlatformError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn expired_session_is_not_found() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let (guard, store, header) = guard_with_session(&record).await;

        store.evict_record_keep_index("sid-1");
        assert!(matches!(
            guard.check(Some(&header), "192.168.1.10", &[]).await,
            Err(PlatformError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn deactivated_session_is_inactive_not_missing() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let (guard, store, header) = guard_with_session(&record).await;

        store.deactivate("sid-1").await.unwrap();
        assert!(matches!(
            guard.check(Some(&header), "192.168.1.10", &[]).await,
            Err(PlatformError::SessionInactive)
        ));
    }

    #[tokio::test]
    async fn token_session_email_mismatch_is_rejected() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let tokens = Arc::new(TokenService::new(jwt_config()));
        let store = Arc::new(MemorySessionStore::new());
        store
            .create("sid-1", &record, Duration::from_secs(60))
            .await
            .unwrap();
        // Token for a different account pointing at this session.
        let token = tokens
            .issue("other@example.com", Some("sid-1"), TokenClass::Auth)
            .unwrap();
        let guard = SessionGuard::new(tokens, store);

        assert!(matches!(
            guard
                .check(Some(&format!("Bearer {token}")), "192.168.1.10", &[])
                .await,
            Err(PlatformError::SessionIdentityMismatch)
        ));
    }

    #[tokio::test]
    async fn subnet_binding_allows_same_slash_24_only() {
        let record = session("u@example.com", "192.168.1.10", &[]);
        let (guard, _store, header) = guard_with_session(&record).await;

        assert!(guard.check(Some(&header), "192.168.1.99", &[]).await.is_ok());
        assert!(matches!(
            guard.check(Some(&header), "192.168.2.10", &[]).await,
            Err(PlatformError::SessionIpMismatch)
        ));
        // IPv6 callers never match an IPv4-bound session.
        assert!(matches!(
            guard.check(Some(&header), "fe80::1", &[]).await,
            Err(PlatformError::SessionIpMismatch)
        ));
    }

    #[tokio::test]
    async fn permissions_use_or_semantics() {
        let record = session("u@example.com", "192.168.1.10", &["A", "B"]);
        let (guard, _store, header) = guard_with_session(&record).await;

        assert!(guard
            .check(Some(&header), "192.168.1.10", &["B", "C"])
            .await
            .is_ok());
        assert!(matches!(
            guard
                .check(Some(&header), "192.168.1.10", &["C", "D"])
                .await,
            Err(PlatformError::InsufficientPermissions)
        ));
    }

    #[tokio::test]
    async fn sidless_token_falls_back_to_raw_token_key() {
        let tokens = Arc::new(TokenService::new(jwt_config()));
        let store = Arc::new(MemorySessionStore::new());
        let token = tokens
            .issue("u@example.com", None, TokenClass::Auth)
            .unwrap();
        let record = session("u@example.com", "192.168.1.10", &[]);
        store
            .create(&token, &record, Duration::from_secs(60))
            .await
            .unwrap();
        let guard = SessionGuard::new(tokens, store);

        let identity = guard
            .check(Some(&format!("Bearer {token}")), "192.168.1.10", &[])
            .await
            .unwrap();
        assert_eq!(identity.session_id.as_deref(), Some(token.as_str()));
    }
}
