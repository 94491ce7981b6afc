//! Authentication Service
//!
//! Login, refresh, logout and the password-reset flow. Login failures
//! never reveal whether the account exists: unknown emails still pay the
//! hash-verification cost and every failure surfaces the same
//! `CREDENTIALS_INVALID` code. Forgot-password responds identically for
//! known and unknown emails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use ag_common::{AuthIdentity, RequestContext};
use ag_config::JwtConfig;

use crate::auth::password::PasswordService;
use crate::session::{device_from_user_agent, SessionRecord, SessionStore, SessionWithSid};
use crate::shared::error::{PlatformError, Result};
use crate::token::{TokenClass, TokenPair, TokenService};
use crate::users::UserRepository;

/// Transport facts about the request performing a login.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip: String,
    pub user_agent: String,
}

/// Delivery of password-reset links. The token never appears in logs or
/// API responses; only the mailer sees it.
#[async_trait]
pub trait ResetMailer: Send + Sync {
    async fn send_reset(&self, email: &str, token: &str) -> Result<()>;
}

/// Mailer stand-in that records the send without the token.
pub struct LoggingResetMailer;

#[async_trait]
impl ResetMailer for LoggingResetMailer {
    async fn send_reset(&self, email: &str, _token: &str) -> Result<()> {
        info!(email, "Password reset email dispatched");
        Ok(())
    }
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<dyn SessionStore>,
    tokens: Arc<TokenService>,
    passwords: Arc<PasswordService>,
    mailer: Arc<dyn ResetMailer>,
    /// Sessions live exactly as long as the refresh token can renew them.
    session_ttl: Duration,
    reset_ttl: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: Arc<dyn SessionStore>,
        tokens: Arc<TokenService>,
        passwords: Arc<PasswordService>,
        mailer: Arc<dyn ResetMailer>,
        jwt: &JwtConfig,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            passwords,
            mailer,
            session_ttl: jwt.refresh.expires_in,
            reset_ttl: jwt.reset_password.expires_in,
        }
    }

    /// Verify credentials and open a new session bound to the caller's
    /// address and device. Each login creates its own session, so one
    /// account can hold several concurrent devices.
    pub async fn login(&self, email: &str, password: &str, meta: &RequestMeta) -> Result<TokenPair> {
        let user = match self.users.find_by_email(email).await? {
            Some(user) if user.active => user,
            _ => {
                // Equalize timing with a real verification.
                self.passwords.verify_dummy(password);
                return Err(PlatformError::CredentialsInvalid);
            }
        };

        if !self.passwords.verify_password(password, &user.password_hash)? {
            return Err(PlatformError::CredentialsInvalid);
        }

        let sid = Uuid::new_v4().to_string();
        let pair = TokenPair {
            access_token: self.tokens.issue(&user.email, Some(&sid), TokenClass::Auth)?,
            refresh_token: self.tokens.issue(&user.email, Some(&sid), TokenClass::Refresh)?,
        };

        let record = SessionRecord {
            user_id: user.id.clone(),
            person_id: user.person_id.clone(),
            email: user.email.clone(),
            permissions: user.permission_codes.clone(),
            active: true,
            ip: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            device: device_from_user_agent(&meta.user_agent),
            created_at: Utc::now(),
            last_refresh_at: None,
        };
        self.sessions.create(&sid, &record, self.session_ttl).await?;

        info!(user_id = %user.id, device = %record.device, "Login succeeded");
        Ok(pair)
    }

    /// Exchange a refresh token for a fresh pair. The session's
    /// permission snapshot is re-read from the user so grants and
    /// revocations take effect at the next refresh.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.tokens.verify(refresh_token, TokenClass::Refresh)?;
        // requires_session guarantees sid is present here
        let sid = claims.sid.clone().unwrap_or_default();

        let session = self
            .sessions
            .get(&sid)
            .await?
            .ok_or(PlatformError::SessionNotFound)?;
        if !session.active {
            return Err(PlatformError::SessionInactive);
        }

        let user = match self.users.find_by_email(&session.email).await? {
            None => return Err(PlatformError::SessionNotFound),
            Some(user) if !user.active => return Err(PlatformError::SessionInactive),
            Some(user) => user,
        };

        let permissions = user.permission_codes.clone();
        let updated = self
            .sessions
            .update(
                &sid,
                Box::new(move |s| {
                    s.permissions = permissions;
                    s.last_refresh_at = Some(Utc::now());
                }),
            )
            .await?;
        // The session can expire between the read above and this write;
        // no token pair leaves without a persisted snapshot.
        if !updated {
            return Err(PlatformError::SessionNotFound);
        }

        self.tokens.rotate(refresh_token)
    }

    /// Tear down the caller's session. Logging out an already-expired
    /// session succeeds.
    pub async fn logout(&self, identity: &AuthIdentity) -> Result<()> {
        if let Some(sid) = &identity.session_id {
            self.sessions.remove(sid, &identity.id).await?;
            info!(user_id = %identity.id, "Logout");
        }
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionWithSid>> {
        self.sessions.list_by_user(user_id).await
    }

    /// Deactivate one of the user's sessions without deleting it, so the
    /// guard can still report `SESSION_INACTIVE` until the TTL runs out.
    pub async fn deactivate_session(&self, user_id: &str, sid: &str) -> Result<()> {
        let owned = self
            .sessions
            .list_by_user(user_id)
            .await?
            .iter()
            .any(|s| s.sid == sid);
        if !owned {
            return Err(PlatformError::not_found("Session", sid));
        }
        self.sessions.deactivate(sid).await?;
        Ok(())
    }

    /// Issue a reset token for the account, if it exists. The response is
    /// the same either way; only the mailer side effect differs.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let Some(user) = self.users.find_by_email(email).await? else {
            return Ok(());
        };
        if !user.active {
            return Ok(());
        }

        let sid = Uuid::new_v4().to_string();
        let token = self
            .tokens
            .issue(&user.email, Some(&sid), TokenClass::ResetPassword)?;
        self.sessions
            .put_reset_token(&token, &user.id, self.reset_ttl)
            .await?;
        self.mailer.send_reset(&user.email, &token).await?;

        Ok(())
    }

    /// Redeem a reset token exactly once and set the new password. Any
    /// failure reads as `RESET_TOKEN_INVALID`; a second redemption of the
    /// same token fails even within its JWT lifetime.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        let claims = self
            .tokens
            .verify(token, TokenClass::ResetPassword)
            .map_err(|_| PlatformError::ResetTokenInvalid)?;

        let user_id = self
            .sessions
            .take_reset_token(token)
            .await?
            .ok_or(PlatformError::ResetTokenInvalid)?;

        let mut user = match self.users.find_by_email(&claims.email).await? {
            Some(user) if user.id == user_id => user,
            _ => {
                warn!("Reset token redeemed against a mismatched account");
                return Err(PlatformError::ResetTokenInvalid);
            }
        };

        user.password_hash = self.passwords.hash_password(new_password)?;
        // The caller holds no authenticated identity in this flow, so the
        // audit record carries a null actor.
        self.users.save(&user, &RequestContext::system()).await?;

        info!(user_id = %user.id, "Password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_config::TokenClassConfig;
    use parking_lot::Mutex;

    use crate::auth::password::Argon2Config;
    use crate::session::{MemorySessionStore, SessionMutator};
    use crate::users::{MemoryUserRepository, User};

    struct CapturingMailer {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResetMailer for CapturingMailer {
        async fn send_reset(&self, email: &str, token: &str) -> Result<()> {
            self.sent.lock().push((email.into(), token.into()));
            Ok(())
        }
    }

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

    struct Harness {
        service: AuthService,
        users: Arc<MemoryUserRepository>,
        sessions: Arc<MemorySessionStore>,
        tokens: Arc<TokenService>,
        mailer: Arc<CapturingMailer>,
    }

    fn harness() -> Harness {
        let users = Arc::new(MemoryUserRepository::new());
        let sessions = Arc::new(MemorySessionStore::new());
        let tokens = Arc::new(TokenService::new(jwt_config()));
        let passwords = Arc::new(PasswordService::new(Argon2Config::testing()));
        let mailer = Arc::new(CapturingMailer { sent: Mutex::new(Vec::new()) });

        let password_hash = passwords.hash_password("Secret123").unwrap();
        users.insert(User {
            id: "u-1".into(),
            person_id: Some("p-1".into()),
            email: "u@example.com".into(),
            password_hash,
            active: true,
            permission_codes: vec!["USERS_READ".into()],
        });

        let service = AuthService::new(
            users.clone(),
            sessions.clone(),
            tokens.clone(),
            passwords,
            mailer.clone(),
            &jwt_config(),
        );

        Harness { service, users, sessions, tokens, mailer }
    }

    fn meta() -> RequestMeta {
        RequestMeta {
            ip: "192.168.1.10".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into(),
        }
    }

    #[tokio::test]
    async fn login_opens_a_session_bound_to_the_request() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();

        let claims = h.tokens.verify(&pair.access_token, TokenClass::Auth).unwrap();
        let sid = claims.sid.unwrap();
        let session = h.sessions.get(&sid).await.unwrap().unwrap();

        assert_eq!(session.user_id, "u-1");
        assert_eq!(session.ip, "192.168.1.10");
        assert_eq!(session.device, "desktop");
        assert_eq!(session.permissions, vec!["USERS_READ"]);
        assert!(session.active);
    }

    #[tokio::test]
    async fn each_login_gets_its_own_session() {
        let h = harness();
        h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();

        assert_eq!(h.service.list_sessions("u-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let h = harness();

        let wrong_password = h.service.login("u@example.com", "nope", &meta()).await;
        let unknown_email = h.service.login("ghost@example.com", "nope", &meta()).await;
        assert!(matches!(wrong_password, Err(PlatformError::CredentialsInvalid)));
        assert!(matches!(unknown_email, Err(PlatformError::CredentialsInvalid)));

        // Inactive accounts read the same.
        let mut user = h.users.find_by_email("u@example.com").await.unwrap().unwrap();
        user.active = false;
        h.users.save(&user, &RequestContext::system()).await.unwrap();
        assert!(matches!(
            h.service.login("u@example.com", "Secret123", &meta()).await,
            Err(PlatformError::CredentialsInvalid)
        ));
    }

    #[tokio::test]
    async fn refresh_resnapshots_permissions() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        let sid = h.tokens.verify(&pair.access_token, TokenClass::Auth).unwrap().sid.unwrap();

        h.users.set_permissions("u@example.com", &["USERS_READ", "USERS_WRITE"]);
        let refreshed = h.service.refresh(&pair.refresh_token).await.unwrap();
        assert!(!refreshed.access_token.is_empty());

        let session = h.sessions.get(&sid).await.unwrap().unwrap();
        assert_eq!(session.permissions, vec!["USERS_READ", "USERS_WRITE"]);
        assert!(session.last_refresh_at.is_some());
    }

    #[tokio::test]
    async fn refresh_of_a_deactivated_session_is_rejected() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        let sid = h.tokens.verify(&pair.access_token, TokenClass::Auth).unwrap().sid.unwrap();

        h.sessions.deactivate(&sid).await.unwrap();
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(PlatformError::SessionInactive)
        ));

        // A fully removed session is simply gone.
        h.sessions.remove(&sid, "u-1").await.unwrap();
        assert!(matches!(
            h.service.refresh(&pair.refresh_token).await,
            Err(PlatformError::SessionNotFound)
        ));
    }

    /// Store double for the window where a session is readable but gone
    /// again by the time the refresh snapshot is written back.
    struct VanishingSessionStore {
        inner: MemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for VanishingSessionStore {
        async fn create(&self, sid: &str, record: &SessionRecord, ttl: Duration) -> Result<()> {
            self.inner.create(sid, record, ttl).await
        }

        async fn get(&self, sid: &str) -> Result<Option<SessionRecord>> {
            self.inner.get(sid).await
        }

        async fn update(&self, _sid: &str, _mutator: SessionMutator) -> Result<bool> {
            Ok(false)
        }

        async fn remove(&self, sid: &str, user_id: &str) -> Result<()> {
            self.inner.remove(sid, user_id).await
        }

        async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionWithSid>> {
            self.inner.list_by_user(user_id).await
        }

        async fn put_reset_token(&self, token: &str, user_id: &str, ttl: Duration) -> Result<()> {
            self.inner.put_reset_token(token, user_id, ttl).await
        }

        async fn take_reset_token(&self, token: &str) -> Result<Option<String>> {
            self.inner.take_reset_token(token).await
        }
    }

    #[tokio::test]
    async fn refresh_fails_when_the_session_expires_mid_flight() {
        let users = Arc::new(MemoryUserRepository::new());
        let sessions = Arc::new(VanishingSessionStore {
            inner: MemorySessionStore::new(),
        });
        let tokens = Arc::new(TokenService::new(jwt_config()));
        let passwords = Arc::new(PasswordService::new(Argon2Config::testing()));

        let password_hash = passwords.hash_password("Secret123").unwrap();
        users.insert(User {
            id: "u-1".into(),
            person_id: None,
            email: "u@example.com".into(),
            password_hash,
            active: true,
            permission_codes: vec![],
        });

        let service = AuthService::new(
            users,
            sessions,
            tokens,
            passwords,
            Arc::new(LoggingResetMailer),
            &jwt_config(),
        );

        let pair = service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        // The read succeeds, the write-back finds the session gone; no
        // rotated pair may come out of that.
        assert!(matches!(
            service.refresh(&pair.refresh_token).await,
            Err(PlatformError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();

        assert!(matches!(
            h.service.refresh(&pair.access_token).await,
            Err(PlatformError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        let sid = h.tokens.verify(&pair.access_token, TokenClass::Auth).unwrap().sid.unwrap();

        let identity = AuthIdentity {
            id: "u-1".into(),
            person_id: None,
            email: "u@example.com".into(),
            session_id: Some(sid.clone()),
            permissions: vec![],
        };
        h.service.logout(&identity).await.unwrap();
        assert!(h.sessions.get(&sid).await.unwrap().is_none());

        h.service.logout(&identity).await.unwrap();
    }

    #[tokio::test]
    async fn deactivate_session_requires_ownership() {
        let h = harness();
        let pair = h.service.login("u@example.com", "Secret123", &meta()).await.unwrap();
        let sid = h.tokens.verify(&pair.access_token, TokenClass::Auth).unwrap().sid.unwrap();

        assert!(matches!(
            h.service.deactivate_session("someone-else", &sid).await,
            Err(PlatformError::NotFound { .. })
        ));

        h.service.deactivate_session("u-1", &sid).await.unwrap();
        assert!(!h.sessions.get(&sid).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn forgot_password_is_silent_for_unknown_emails() {
        let h = harness();

        h.service.forgot_password("ghost@example.com").await.unwrap();
        assert!(h.mailer.sent.lock().is_empty());

        h.service.forgot_password("u@example.com").await.unwrap();
        let sent = h.mailer.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u@example.com");
    }

    #[tokio::test]
    async fn reset_token_redeems_exactly_once() {
        let h = harness();
        h.service.forgot_password("u@example.com").await.unwrap();
        let token = h.mailer.sent.lock()[0].1.clone();

        h.service.reset_password(&token, "NewSecret456").await.unwrap();
        assert!(h.service.login("u@example.com", "NewSecret456", &meta()).await.is_ok());
        assert!(matches!(
            h.service.login("u@example.com", "Secret123", &meta()).await,
            Err(PlatformError::CredentialsInvalid)
        ));

        // Second redemption fails even though the JWT is still valid.
        assert!(matches!(
            h.service.reset_password(&token, "Another789").await,
            Err(PlatformError::ResetTokenInvalid)
        ));
    }

    #[tokio::test]
    async fn garbage_reset_token_is_invalid() {
        let h = harness();
        assert!(matches!(
            h.service.reset_password("not-a-jwt", "x").await,
            Err(PlatformError::ResetTokenInvalid)
        ));
    }
}
