use serde::{Deserialize, Serialize};

pub mod logging;

// ============================================================================
// Authenticated Identity
// ============================================================================

/// The identity attached to a request once a guard has allowed it.
///
/// Produced by the session guard (from the session snapshot) or by the
/// API-key guard (from the key record). Handlers and write paths receive
/// this through the [`RequestContext`]; it is never stored globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthIdentity {
    /// User (or API key) id
    pub id: String,
    /// Person the user belongs to, when applicable
    pub person_id: Option<String>,
    pub email: String,
    /// Session id for session-authenticated requests; `None` for API keys
    pub session_id: Option<String>,
    /// Permission codes snapshotted at login/refresh (or assigned to the key)
    pub permissions: Vec<String>,
}

impl AuthIdentity {
    /// OR semantics: at least one of `required` must be present.
    /// An empty requirement always passes.
    pub fn has_any_permission(&self, required: &[&str]) -> bool {
        required.is_empty() || required.iter().any(|r| self.permissions.iter().any(|p| p == r))
    }

    /// The actor reference recorded into audit payloads.
    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id.clone(),
            email: self.email.clone(),
        }
    }
}

/// Minimal acting-identity reference carried into audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: String,
}

// ============================================================================
// Request Context
// ============================================================================

/// Per-request context slot holding at most one authenticated identity.
///
/// Constructed once at the guard boundary and threaded by reference into
/// every call that needs the acting identity (audit capture in
/// particular). One instance per inbound request; dropped when the
/// request completes. System-initiated writes use [`RequestContext::system`].
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    identity: Option<AuthIdentity>,
}

impl RequestContext {
    /// Context for a request authenticated as `identity`.
    pub fn authenticated(identity: AuthIdentity) -> Self {
        Self { identity: Some(identity) }
    }

    /// Context for system-initiated work with no acting user.
    pub fn system() -> Self {
        Self { identity: None }
    }

    pub fn identity(&self) -> Option<&AuthIdentity> {
        self.identity.as_ref()
    }

    pub fn actor(&self) -> Option<Actor> {
        self.identity.as_ref().map(AuthIdentity::actor)
    }
}
