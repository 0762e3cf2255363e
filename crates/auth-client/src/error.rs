//! Uniform error shape for every remote auth call.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes.
///
/// Most are issued by the identity provider; the ceremony codes
/// (`passkey_not_supported` through `timeout_or_mismatch`) are produced
/// locally when a WebAuthn ceremony fails, so the sign-in machine sees
/// one error shape regardless of where the failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorCode {
    InvalidEmail,
    UserNotFound,
    InvalidCode,
    ExpiredCode,
    RateLimited,
    InvalidToken,
    SessionRevoked,
    PasskeyNotSupported,
    CredentialNotFound,
    UserCancelled,
    TimeoutOrMismatch,
    Network,
    Server,
    #[serde(other)]
    Unknown,
}

/// Error returned by every [`AuthApi`](crate::AuthApi) call.
///
/// `message` exists for logs and inline display only; control flow
/// branches on `code` and `retryable`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    /// Whether the same request can be retried as-is.
    pub retryable: bool,
    /// Server-supplied backoff hint in milliseconds, from `Retry-After`.
    pub retry_after_ms: Option<u64>,
}

impl ApiError {
    pub fn new(code: ApiErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            retry_after_ms: None,
        }
    }

    /// A 429 with an optional server backoff hint.
    pub fn rate_limited(retry_after_ms: Option<u64>) -> Self {
        Self {
            code: ApiErrorCode::RateLimited,
            message: "Too many requests".to_string(),
            retryable: true,
            retry_after_ms,
        }
    }

    /// A transport-level failure (connect, timeout, TLS).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Network, message, true)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.code == ApiErrorCode::RateLimited
    }

    /// Errors the user can fix by re-entering input (wrong code, typo'd
    /// email); these never tear down the current sign-in step.
    pub fn is_user_fixable(&self) -> bool {
        matches!(
            self.code,
            ApiErrorCode::InvalidEmail | ApiErrorCode::InvalidCode | ApiErrorCode::ExpiredCode
        )
    }
}

/// Result type alias using [`ApiError`].
pub type ApiResult<T> = Result<T, ApiError>;
