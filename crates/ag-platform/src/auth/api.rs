//! Auth API Endpoints
//!
//! HTTP surface over the orchestration services.
//! - POST /auth/login - Password-based login
//! - POST /auth/refresh - Token pair refresh
//! - POST /auth/logout - Session teardown
//! - POST /auth/forgot-password - Start the password-reset flow
//! - POST /auth/reset-password/:token - Redeem a reset token
//! - GET /auth/sessions - List the caller's sessions
//! - POST /auth/sessions/:sid/deactivate - Deactivate one of them
//! - POST /api-keys - Issue a machine key
//! - POST /api-keys/:id/deactivate - Revoke a machine key

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use ag_common::RequestContext;

use crate::auth::api_key::{ApiKeyService, IssuedApiKey};
use crate::auth::guard::{require_any_permission, Authenticated};
use crate::auth::service::{AuthService, RequestMeta};
use crate::session::SessionWithSid;
use crate::shared::error::{PlatformError, Result};
use crate::token::TokenPair;

/// Permission code required for API-key management endpoints.
pub const API_KEYS_MANAGE: &str = "API_KEYS_MANAGE";

#[derive(Clone)]
pub struct ApiState {
    pub auth_service: Arc<AuthService>,
    pub api_key_service: Arc<ApiKeyService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub client: String,
    #[serde(default)]
    pub permission_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

impl From<TokenPair> for TokenPairResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

fn request_meta(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestMeta {
    RequestMeta {
        ip: crate::shared::net::client_ip(headers, peer),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    }
}

async fn login(
    State(state): State<ApiState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>> {
    let meta = request_meta(&headers, Some(peer));
    let pair = state.auth_service.login(&body.email, &body.password, &meta).await?;
    Ok(Json(pair.into()))
}

async fn refresh(
    State(state): State<ApiState>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>> {
    let pair = state.auth_service.refresh(&body.refresh_token).await?;
    Ok(Json(pair.into()))
}

async fn logout(
    State(state): State<ApiState>,
    Authenticated(identity): Authenticated,
) -> Result<StatusCode> {
    state.auth_service.logout(&identity).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn forgot_password(
    State(state): State<ApiState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse> {
    state.auth_service.forgot_password(&body.email).await?;
    // Same body whether or not the account exists.
    Ok(Json(serde_json::json!({
        "message": "If the account exists, a reset email has been sent"
    })))
}

async fn reset_password(
    State(state): State<ApiState>,
    Path(token): Path<String>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<StatusCode> {
    if body.password.len() < 8 {
        return Err(PlatformError::validation(
            "Password must be at least 8 characters",
        ));
    }
    state.auth_service.reset_password(&token, &body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sessions(
    State(state): State<ApiState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Vec<SessionWithSid>>> {
    let sessions = state.auth_service.list_sessions(&identity.id).await?;
    Ok(Json(sessions))
}

async fn deactivate_session(
    State(state): State<ApiState>,
    Authenticated(identity): Authenticated,
    Path(sid): Path<String>,
) -> Result<StatusCode> {
    state.auth_service.deactivate_session(&identity.id, &sid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_api_key(
    State(state): State<ApiState>,
    Authenticated(identity): Authenticated,
    Json(body): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<IssuedApiKey>)> {
    require_any_permission(&identity, &[API_KEYS_MANAGE])?;
    let ctx = RequestContext::authenticated(identity);
    let issued = state
        .api_key_service
        .create(&body.client, body.permission_codes, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn deactivate_api_key(
    State(state): State<ApiState>,
    Authenticated(identity): Authenticated,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    require_any_permission(&identity, &[API_KEYS_MANAGE])?;
    let ctx = RequestContext::authenticated(identity);
    state.api_key_service.deactivate(&id, &ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Assemble the auth router. The caller applies [`crate::auth::guard::AuthLayer`]
/// so the `Authenticated` extractor can reach the guard.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", post(reset_password))
        .route("/auth/sessions", get(list_sessions))
        .route("/auth/sessions/:sid/deactivate", post(deactivate_session))
        .route("/api-keys", post(create_api_key))
        .route("/api-keys/:id/deactivate", post(deactivate_api_key))
        .with_state(state)
}
