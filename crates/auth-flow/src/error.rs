//! Error types and the propagation taxonomy.

use auth_client::{ApiError, ApiErrorCode};
use session_store::StoreError;
use thiserror::Error;

use crate::ceremony::CeremonyError;

/// Auth core error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Remote auth call failed
    #[error("Remote auth call failed: {0}")]
    Api(#[from] ApiError),

    /// WebAuthn ceremony failed
    #[error("Ceremony failed: {0}")]
    Ceremony(#[from] CeremonyError),

    /// Session storage failed
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// No session exists
    #[error("Not signed in")]
    NotSignedIn,

    /// Refresh retries exhausted
    #[error("Token refresh failed after {0} attempts")]
    RefreshExhausted(u32),

    /// Invalid lifecycle transition
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),
}

/// How an error propagates through the core.
///
/// `User` and `Ceremony` are absorbed by the sign-in machine (the user
/// stays on the current step); `TransientServer` triggers backoff;
/// `FatalServer` forces sign-out and a full session clear;
/// `Configuration` disables the affected method for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    User,
    Ceremony,
    TransientServer,
    FatalServer,
    Configuration,
}

impl AuthError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AuthError::Api(e) => classify_api(e),
            AuthError::Ceremony(CeremonyError::NotSupported) => ErrorClass::Configuration,
            AuthError::Ceremony(_) => ErrorClass::Ceremony,
            AuthError::Store(_) => ErrorClass::FatalServer,
            AuthError::NotSignedIn => ErrorClass::User,
            AuthError::RefreshExhausted(_) => ErrorClass::FatalServer,
            AuthError::InvalidStateTransition(_) => ErrorClass::Configuration,
        }
    }

    /// Retryable without user intervention.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::TransientServer
    }

    /// Requires sign-out and session clear.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::FatalServer
    }
}

fn classify_api(err: &ApiError) -> ErrorClass {
    match err.code {
        ApiErrorCode::InvalidEmail
        | ApiErrorCode::UserNotFound
        | ApiErrorCode::InvalidCode
        | ApiErrorCode::ExpiredCode => ErrorClass::User,
        ApiErrorCode::RateLimited | ApiErrorCode::Network | ApiErrorCode::Server => {
            ErrorClass::TransientServer
        }
        ApiErrorCode::InvalidToken | ApiErrorCode::SessionRevoked => ErrorClass::FatalServer,
        ApiErrorCode::PasskeyNotSupported => ErrorClass::Configuration,
        ApiErrorCode::CredentialNotFound
        | ApiErrorCode::UserCancelled
        | ApiErrorCode::TimeoutOrMismatch => ErrorClass::Ceremony,
        ApiErrorCode::Unknown => {
            if err.retryable {
                ErrorClass::TransientServer
            } else {
                ErrorClass::FatalServer
            }
        }
    }
}

/// Result type alias using [`AuthError`].
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_code_is_user_class() {
        let err = AuthError::Api(ApiError::new(ApiErrorCode::InvalidCode, "nope", false));
        assert_eq!(err.class(), ErrorClass::User);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rate_limited_is_transient() {
        let err = AuthError::Api(ApiError::rate_limited(None));
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_token_is_fatal() {
        let err = AuthError::Api(ApiError::new(ApiErrorCode::InvalidToken, "expired", false));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cancelled_ceremony_is_ceremony_class() {
        let err = AuthError::Ceremony(CeremonyError::Cancelled);
        assert_eq!(err.class(), ErrorClass::Ceremony);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_capability_is_configuration() {
        let err = AuthError::Ceremony(CeremonyError::NotSupported);
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn test_refresh_exhausted_is_fatal() {
        assert!(AuthError::RefreshExhausted(2).is_fatal());
    }
}
