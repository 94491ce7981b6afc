//! Token Service
//!
//! Signs and verifies the three token classes (auth, refresh,
//! reset-password), each with its own HS256 secret and expiry, and
//! decides refresh rotation: a refresh token is only re-issued when its
//! remaining lifetime drops below the configured threshold, so the
//! session index is not churned on every refresh.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use ag_config::{JwtConfig, TokenClassConfig};

use crate::shared::error::{PlatformError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Auth,
    Refresh,
    ResetPassword,
}

impl TokenClass {
    /// Refresh and reset-password tokens are meaningless without the
    /// session they are bound to.
    fn requires_session(&self) -> bool {
        !matches!(self, TokenClass::Auth)
    }
}

/// JWT claims carried by every token class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    /// Session id; optional only for unbound access tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    config: JwtConfig,
}

impl TokenService {
    pub fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    fn class_config(&self, class: TokenClass) -> &TokenClassConfig {
        match class {
            TokenClass::Auth => &self.config.auth,
            TokenClass::Refresh => &self.config.refresh,
            TokenClass::ResetPassword => &self.config.reset_password,
        }
    }

    /// Sign a token of the given class.
    pub fn issue(&self, email: &str, sid: Option<&str>, class: TokenClass) -> Result<String> {
        let class_config = self.class_config(class);
        let now = Utc::now();
        let exp = now + Duration::from_std(class_config.expires_in).map_err(|_| PlatformError::TokenIssuance)?;

        let claims = Claims {
            email: email.to_string(),
            sid: sid.map(String::from),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(class_config.secret.as_bytes()),
        )
        .map_err(|_| PlatformError::TokenIssuance)
    }

    /// Verify a token against the given class's secret.
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims> {
        let class_config = self.class_config(class);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(class_config.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => PlatformError::TokenExpired,
            _ => PlatformError::TokenInvalid,
        })?;

        if class.requires_session() && claims.sid.is_none() {
            return Err(PlatformError::TokenMissingSession);
        }

        Ok(claims)
    }

    /// Exchange a refresh token for a fresh pair.
    ///
    /// The access token is always re-issued. The refresh token is only
    /// rotated when its remaining lifetime in whole minutes is below the
    /// configured threshold; otherwise the caller gets the original
    /// string back. Any verification failure collapses to
    /// [`PlatformError::TokenInvalid`].
    pub fn rotate(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self
            .verify(refresh_token, TokenClass::Refresh)
            .map_err(|_| PlatformError::TokenInvalid)?;

        let remaining_minutes = (claims.exp - Utc::now().timestamp()) / 60;
        let should_rotate = remaining_minutes < self.config.refresh_renew_threshold_minutes;

        let access_token = self.issue(&claims.email, claims.sid.as_deref(), TokenClass::Auth)?;
        let refresh_token = if should_rotate {
            self.issue(&claims.email, claims.sid.as_deref(), TokenClass::Refresh)?
        } else {
            refresh_token.to_string()
        };

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            auth: TokenClassConfig {
                secret: "auth-secret-0123456789abcdef0123456789".into(),
                expires_in: StdDuration::from_secs(24 * 3600),
            },
            refresh: TokenClassConfig {
                secret: "refresh-secret-0123456789abcdef01234567".into(),
                expires_in: StdDuration::from_secs(7 * 86_400),
            },
            reset_password: TokenClassConfig {
                secret: "reset-secret-0123456789abcdef0123456789".into(),
                expires_in: StdDuration::from_secs(15 * 60),
            },
            refresh_renew_threshold_minutes: 20,
        }
    }

    fn service() -> TokenService {
        TokenService::new(jwt_config())
    }

    /// Hand-craft a refresh token with a chosen expiry.
    fn refresh_token_expiring_in(service: &TokenService, minutes: i64) -> String {
        let now = Utc::now();
        let claims = Claims {
            email: "u@example.com".into(),
            sid: Some("sid-1".into()),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(minutes)).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(service.config.refresh.secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issue_verify_round_trip_for_all_classes() {
        let service = service();
        for class in [TokenClass::Auth, TokenClass::Refresh, TokenClass::ResetPassword] {
            let token = service.issue("u@example.com", Some("sid-1"), class).unwrap();
            let claims = service.verify(&token, class).unwrap();
            assert_eq!(claims.email, "u@example.com");
            assert_eq!(claims.sid.as_deref(), Some("sid-1"));
        }
    }

    #[test]
    fn cross_class_verification_fails() {
        let service = service();
        let token = service.issue("u@example.com", Some("sid-1"), TokenClass::Auth).unwrap();
        assert!(matches!(
            service.verify(&token, TokenClass::Refresh),
            Err(PlatformError::TokenInvalid)
        ));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let service = service();
        let now = Utc::now();
        let claims = Claims {
            email: "u@example.com".into(),
            sid: None,
            iat: (now - Duration::hours(2)).timestamp(),
            exp: (now - Duration::hours(1)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(service.config.auth.secret.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            service.verify(&token, TokenClass::Auth),
            Err(PlatformError::TokenExpired)
        ));
    }

    #[test]
    fn session_bound_classes_require_sid() {
        let service = service();
        let token = service.issue("u@example.com", None, TokenClass::Refresh).unwrap();
        assert!(matches!(
            service.verify(&token, TokenClass::Refresh),
            Err(PlatformError::TokenMissingSession)
        ));

        // Access tokens may be unbound.
        let token = service.issue("u@example.com", None, TokenClass::Auth).unwrap();
        assert!(service.verify(&token, TokenClass::Auth).unwrap().sid.is_none());
    }

    #[test]
    fn rotate_keeps_refresh_token_far_from_expiry() {
        let service = service();
        let refresh = refresh_token_expiring_in(&service, 120);

        let pair = service.rotate(&refresh).unwrap();
        assert_eq!(pair.refresh_token, refresh);

        let access = service.verify(&pair.access_token, TokenClass::Auth).unwrap();
        assert_eq!(access.sid.as_deref(), Some("sid-1"));
    }

    #[test]
    fn rotate_reissues_refresh_token_near_expiry() {
        let service = service();
        let refresh = refresh_token_expiring_in(&service, 5);

        let pair = service.rotate(&refresh).unwrap();
        assert_ne!(pair.refresh_token, refresh);

        let rotated = service.verify(&pair.refresh_token, TokenClass::Refresh).unwrap();
        assert_eq!(rotated.sid.as_deref(), Some("sid-1"));
        assert_eq!(rotated.email, "u@example.com");
    }

    #[test]
    fn rotate_rejects_garbage_as_invalid() {
        let service = service();
        assert!(matches!(
            service.rotate("not-a-jwt"),
            Err(PlatformError::TokenInvalid)
        ));
    }
}
