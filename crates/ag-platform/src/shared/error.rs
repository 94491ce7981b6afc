//! Platform Error Types
//!
//! The guard-side taxonomy is deliberately fine-grained: every failed
//! guard transition has its own variant and stable machine-readable
//! code, so clients can drive re-authentication flows. Login failures
//! collapse into a single non-enumerable `CredentialsInvalid`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    // ------------------------------------------------------------------
    // Guard failures (401/403 with a specific code)
    // ------------------------------------------------------------------
    #[error("Authorization header missing")]
    AuthHeaderMissing,

    #[error("Invalid authorization header format")]
    AuthHeaderMalformed,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token verification failed")]
    TokenInvalid,

    #[error("Token is not bound to a session")]
    TokenMissingSession,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session is not active")]
    SessionInactive,

    #[error("Session identity mismatch")]
    SessionIdentityMismatch,

    #[error("Request IP does not match session subnet")]
    SessionIpMismatch,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Invalid API key")]
    ApiKeyInvalid,

    // ------------------------------------------------------------------
    // Login / account flows
    // ------------------------------------------------------------------
    /// Deliberately covers unknown email, inactive user and wrong
    /// password alike.
    #[error("Wrong email or password")]
    CredentialsInvalid,

    #[error("Invalid or expired reset token")]
    ResetTokenInvalid,

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    // ------------------------------------------------------------------
    // Internal (500, details never leaked to the caller)
    // ------------------------------------------------------------------
    #[error("Failed to issue token")]
    TokenIssuance,

    #[error("Session store error: {0}")]
    SessionStore(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            PlatformError::AuthHeaderMissing => "AUTH_HEADER_MISSING",
            PlatformError::AuthHeaderMalformed => "AUTH_HEADER_MALFORMED",
            PlatformError::TokenExpired => "TOKEN_EXPIRED",
            PlatformError::TokenInvalid => "TOKEN_INVALID",
            PlatformError::TokenMissingSession => "TOKEN_MISSING_SESSION",
            PlatformError::SessionNotFound => "SESSION_NOT_FOUND",
            PlatformError::SessionInactive => "SESSION_INACTIVE",
            PlatformError::SessionIdentityMismatch => "SESSION_IDENTITY_MISMATCH",
            PlatformError::SessionIpMismatch => "SESSION_IP_MISMATCH",
            PlatformError::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            PlatformError::ApiKeyInvalid => "API_KEY_INVALID",
            PlatformError::CredentialsInvalid => "CREDENTIALS_INVALID",
            PlatformError::ResetTokenInvalid => "RESET_TOKEN_INVALID",
            PlatformError::NotFound { .. } => "NOT_FOUND",
            PlatformError::Validation { .. } => "VALIDATION_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            PlatformError::AuthHeaderMissing
            | PlatformError::AuthHeaderMalformed
            | PlatformError::TokenExpired
            | PlatformError::TokenInvalid
            | PlatformError::TokenMissingSession
            | PlatformError::SessionNotFound
            | PlatformError::SessionInactive
            | PlatformError::SessionIdentityMismatch
            | PlatformError::SessionIpMismatch
            | PlatformError::ApiKeyInvalid
            | PlatformError::CredentialsInvalid
            | PlatformError::ResetTokenInvalid => StatusCode::UNAUTHORIZED,
            PlatformError::InsufficientPermissions => StatusCode::FORBIDDEN,
            PlatformError::NotFound { .. } => StatusCode::NOT_FOUND,
            PlatformError::Validation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for PlatformError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal variants keep their detail out of the response.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: self.code().to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
