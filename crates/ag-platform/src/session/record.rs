//! Session record
//!
//! The server-held snapshot behind each issued token pair. Permissions
//! are captured at login and corrected only on refresh; `active = false`
//! marks a session deactivated by an operator while its TTL runs out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub person_id: Option<String>,
    pub email: String,
    /// Permission codes snapshotted at login/refresh
    pub permissions: Vec<String>,
    pub active: bool,
    /// Login IP the session is subnet-bound to
    pub ip: String,
    pub user_agent: String,
    /// Coarse device descriptor derived from the user agent
    pub device: String,
    pub created_at: DateTime<Utc>,
    pub last_refresh_at: Option<DateTime<Utc>>,
}

/// A session record together with its id, as returned by listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionWithSid {
    pub sid: String,
    #[serde(flatten)]
    pub record: SessionRecord,
}

/// Coarse device classification from the user agent string. Only used
/// for display in session listings, so it stays deliberately crude.
pub fn device_from_user_agent(user_agent: &str) -> String {
    let ua = user_agent.to_ascii_lowercase();
    if ua.is_empty() {
        "unknown".to_string()
    } else if ["mobile", "android", "iphone", "ipad"].iter().any(|m| ua.contains(m)) {
        "mobile".to_string()
    } else if ["windows", "macintosh", "x11", "linux"].iter().any(|d| ua.contains(d)) {
        "desktop".to_string()
    } else {
        "other".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_user_agents() {
        assert_eq!(
            device_from_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)"),
            "mobile"
        );
        assert_eq!(
            device_from_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)"),
            "desktop"
        );
        assert_eq!(device_from_user_agent("curl/8.4.0"), "other");
        assert_eq!(device_from_user_agent(""), "unknown");
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = SessionRecord {
            user_id: "u-1".into(),
            person_id: Some("p-1".into()),
            email: "u@example.com".into(),
            permissions: vec!["USERS_READ".into()],
            active: true,
            ip: "192.168.1.10".into(),
            user_agent: "curl/8.4.0".into(),
            device: "other".into(),
            created_at: Utc::now(),
            last_refresh_at: None,
        };

        let json = serde_json::to_string(&record).unwrap();
        let parsed: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.email, record.email);
        assert!(parsed.active);
        assert_eq!(parsed.permissions, record.permissions);
    }
}
