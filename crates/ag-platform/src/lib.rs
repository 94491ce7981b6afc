//! Authgate Platform
//!
//! Session-authentication core for the identity service: token issuance
//! and rotation, the Redis-backed multi-device session store, the
//! session and API-key guards, login/refresh/logout orchestration, and
//! transactional audit capture into the outbox.

pub mod audit;
pub mod auth;
pub mod session;
pub mod shared;
pub mod token;
pub mod users;

pub use audit::{audit_pattern, audit_payload, AuditOp, Auditable, ChangeRecorder};
pub use auth::{
    ApiKeyGuard, ApiKeyService, ApiState, Argon2Config, AuthLayer, Authenticated, AuthService,
    GuardState, PasswordService, SessionGuard,
};
pub use session::{MemorySessionStore, RedisSessionStore, SessionRecord, SessionStore};
pub use shared::error::{PlatformError, Result};
pub use token::{Claims, TokenClass, TokenPair, TokenService};
pub use users::{MemoryUserRepository, PostgresUserRepository, User, UserRepository};
