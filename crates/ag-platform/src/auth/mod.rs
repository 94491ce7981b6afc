//! Authentication: guards, credential verification, token orchestration
//! and the HTTP surface.

pub mod api;
pub mod api_key;
pub mod guard;
pub mod password;
pub mod service;

pub use api::{ApiState, router};
pub use api_key::{
    ApiKeyAuthenticated, ApiKeyGuard, ApiKeyRecord, ApiKeyRepository, ApiKeyService,
    IssuedApiKey, MemoryApiKeyRepository, PostgresApiKeyRepository, API_KEY_HEADER,
};
pub use guard::{AuthLayer, Authenticated, GuardState, SessionGuard};
pub use password::{Argon2Config, PasswordService};
pub use service::{AuthService, LoggingResetMailer, RequestMeta, ResetMailer};
