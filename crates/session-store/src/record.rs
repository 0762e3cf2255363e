//! The persisted proof of authentication.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// How the current session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Passkey,
    Code,
    MagicLink,
}

/// The single current session: tokens, expiry, and the user they belong
/// to.
///
/// Exactly one logical record exists per lifecycle manager. On refresh
/// the whole token set is swapped at once; fields are never merged from
/// stale data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: i64,
    pub auth_method: AuthMethod,
}

impl SessionRecord {
    /// Whether the access token is expired at the given epoch-ms
    /// instant.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }

    /// Whether the access token is expired right now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// A record without a refresh token is cleared instead of refreshed.
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Invariant check: a record is never persisted with an empty
    /// access token.
    pub fn validate(&self) -> StoreResult<()> {
        if self.access_token.is_empty() {
            return Err(StoreError::MissingAccessToken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: i64) -> SessionRecord {
        SessionRecord {
            user_id: "user-1".to_string(),
            email: "a@example.com".to_string(),
            name: None,
            email_verified: true,
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at,
            auth_method: AuthMethod::Passkey,
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let r = record(1_000);
        assert!(r.is_expired_at(1_000));
        assert!(r.is_expired_at(1_001));
        assert!(!r.is_expired_at(999));
    }

    #[test]
    fn test_future_expiry_is_not_expired() {
        let r = record(Utc::now().timestamp_millis() + 3_600_000);
        assert!(!r.is_expired());
    }

    #[test]
    fn test_empty_refresh_token_cannot_refresh() {
        let mut r = record(0);
        r.refresh_token = String::new();
        assert!(!r.can_refresh());
    }

    #[test]
    fn test_validate_rejects_empty_access_token() {
        let mut r = record(0);
        r.access_token = String::new();
        assert!(matches!(
            r.validate(),
            Err(StoreError::MissingAccessToken)
        ));
    }

    #[test]
    fn test_auth_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuthMethod::MagicLink).unwrap(),
            "\"magic_link\""
        );
    }
}
