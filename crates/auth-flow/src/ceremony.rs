//! Credential ceremony adapter.
//!
//! Wraps the platform's public-key credential capability: one WebAuthn
//! ceremony (`create` for registration, `get` for authentication) per
//! call, outcome classification, and transport-safe serialization of
//! the opaque binary credential.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use auth_client::{ApiError, ApiErrorCode, Challenge, CredentialDescriptor, PortableCredential};

/// Explicit failure reason reported by the platform, when it reports
/// one at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorCode {
    NotSupported,
    NotFound,
    Cancelled,
    Timeout,
    SecurityError,
}

/// Failure surfaced by the platform capability.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct PlatformError {
    /// Most platforms report a bare not-allowed error with no code.
    pub code: Option<PlatformErrorCode>,
    pub message: String,
}

impl PlatformError {
    pub fn new(code: Option<PlatformErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Raw credential as returned by the platform, binary fields untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCredential {
    pub id: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Option<Vec<u8>>,
    pub signature: Option<Vec<u8>>,
    pub user_handle: Option<Vec<u8>>,
    pub attestation_object: Option<Vec<u8>>,
}

/// Options for a `create` (registration) ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub timeout_ms: u64,
    pub user_name: String,
    pub user_display_name: String,
    /// Always true: possession alone is not enough for sign-in.
    pub require_user_verification: bool,
    /// Always true: the credential must be usable without the server
    /// first supplying its id.
    pub prefer_discoverable: bool,
}

/// Options for a `get` (authentication) ceremony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRequest {
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub timeout_ms: u64,
    /// Empty means a discoverable (resident-key) assertion.
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub require_user_verification: bool,
}

/// Platform-provided credential capability.
///
/// Both calls are cancellable by the user at the platform level; a
/// cancel resolves the call with an error rather than hanging.
#[async_trait]
pub trait CredentialCapability: Send + Sync {
    /// Whether a public-key credential API exists at all.
    fn is_supported(&self) -> bool {
        true
    }

    async fn create(&self, request: RegistrationRequest)
        -> Result<PlatformCredential, PlatformError>;

    async fn get(&self, request: AssertionRequest) -> Result<PlatformCredential, PlatformError>;
}

/// Elapsed-time thresholds for classifying an unexplained failure.
///
/// The platform does not reliably say *why* a ceremony failed, so wall
/// clock is the fallback signal: an instant failure means no matching
/// credential, anything up to the cancel window is the user dismissing
/// the prompt, and longer than that is a timeout or authenticator
/// mismatch. Approximate on purpose; an explicit platform code always
/// wins.
#[derive(Debug, Clone)]
pub struct CeremonyTiming {
    pub not_found_within: Duration,
    pub cancelled_within: Duration,
}

impl Default for CeremonyTiming {
    fn default() -> Self {
        Self {
            not_found_within: Duration::from_millis(500),
            cancelled_within: Duration::from_secs(30),
        }
    }
}

/// The three-plus ways a ceremony can end badly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    /// No public-key credential capability on this platform
    #[error("Passkeys are not supported on this platform")]
    NotSupported,

    /// No matching credential on this device
    #[error("No matching credential found")]
    CredentialNotFound,

    /// User dismissed the prompt; never fatal
    #[error("Ceremony cancelled by the user")]
    Cancelled,

    /// Ran out the clock, or the authenticator did not match
    #[error("Ceremony timed out or authenticator mismatch")]
    TimeoutOrMismatch,

    /// Anything else the platform reported
    #[error("Ceremony failed: {0}")]
    Failed(String),
}

impl CeremonyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CeremonyError::Cancelled)
    }
}

impl From<CeremonyError> for ApiError {
    fn from(err: CeremonyError) -> Self {
        let code = match err {
            CeremonyError::NotSupported => ApiErrorCode::PasskeyNotSupported,
            CeremonyError::CredentialNotFound => ApiErrorCode::CredentialNotFound,
            CeremonyError::Cancelled => ApiErrorCode::UserCancelled,
            CeremonyError::TimeoutOrMismatch => ApiErrorCode::TimeoutOrMismatch,
            CeremonyError::Failed(_) => ApiErrorCode::Unknown,
        };
        ApiError::new(code, err.to_string(), false)
    }
}

/// Performs exactly one ceremony per call and classifies the outcome.
pub struct CeremonyAdapter {
    capability: Arc<dyn CredentialCapability>,
    timing: CeremonyTiming,
}

impl CeremonyAdapter {
    pub fn new(capability: Arc<dyn CredentialCapability>) -> Self {
        Self {
            capability,
            timing: CeremonyTiming::default(),
        }
    }

    pub fn with_timing(capability: Arc<dyn CredentialCapability>, timing: CeremonyTiming) -> Self {
        Self { capability, timing }
    }

    /// Run a registration ceremony. Takes the challenge by value: a
    /// challenge is single-use and is consumed here whatever happens.
    pub async fn register(
        &self,
        challenge: Challenge,
        email: &str,
        display_name: &str,
    ) -> Result<PortableCredential, CeremonyError> {
        if !self.capability.is_supported() {
            return Err(CeremonyError::NotSupported);
        }

        let request = RegistrationRequest {
            challenge: challenge.challenge,
            rp_id: challenge.rp_id,
            timeout_ms: challenge.timeout_ms,
            user_name: email.to_string(),
            user_display_name: display_name.to_string(),
            require_user_verification: true,
            prefer_discoverable: true,
        };

        let started = Instant::now();
        match self.capability.create(request).await {
            Ok(raw) => Ok(serialize(&raw)),
            Err(err) => Err(self.classify(err, started.elapsed())),
        }
    }

    /// Run an authentication ceremony. An empty `allow_credentials` on
    /// the challenge means a discoverable assertion.
    pub async fn authenticate(
        &self,
        challenge: Challenge,
    ) -> Result<PortableCredential, CeremonyError> {
        if !self.capability.is_supported() {
            return Err(CeremonyError::NotSupported);
        }

        if challenge.allow_credentials.is_empty() {
            debug!(rp_id = %challenge.rp_id, "Running discoverable assertion");
        }

        let request = AssertionRequest {
            challenge: challenge.challenge,
            rp_id: challenge.rp_id,
            timeout_ms: challenge.timeout_ms,
            allow_credentials: challenge.allow_credentials,
            require_user_verification: true,
        };

        let started = Instant::now();
        match self.capability.get(request).await {
            Ok(raw) => Ok(serialize(&raw)),
            Err(err) => Err(self.classify(err, started.elapsed())),
        }
    }

    fn classify(&self, err: PlatformError, elapsed: Duration) -> CeremonyError {
        if let Some(code) = err.code {
            return match code {
                PlatformErrorCode::NotSupported => CeremonyError::NotSupported,
                PlatformErrorCode::NotFound => CeremonyError::CredentialNotFound,
                PlatformErrorCode::Cancelled => CeremonyError::Cancelled,
                PlatformErrorCode::Timeout => CeremonyError::TimeoutOrMismatch,
                PlatformErrorCode::SecurityError => CeremonyError::Failed(err.message),
            };
        }

        let classified = if elapsed < self.timing.not_found_within {
            CeremonyError::CredentialNotFound
        } else if elapsed < self.timing.cancelled_within {
            CeremonyError::Cancelled
        } else {
            CeremonyError::TimeoutOrMismatch
        };
        warn!(
            elapsed_ms = elapsed.as_millis() as u64,
            classified = ?classified,
            "Ceremony failed without a platform code, classified by elapsed time"
        );
        classified
    }
}

/// Convert a raw platform credential into its transport encoding:
/// base64url without padding, per field.
pub fn serialize(credential: &PlatformCredential) -> PortableCredential {
    let encode = |bytes: &[u8]| URL_SAFE_NO_PAD.encode(bytes);

    PortableCredential {
        id: encode(&credential.id),
        credential_type: "public-key".to_string(),
        client_data_json: encode(&credential.client_data_json),
        authenticator_data: credential.authenticator_data.as_deref().map(encode),
        signature: credential.signature.as_deref().map(encode),
        user_handle: credential.user_handle.as_deref().map(encode),
        attestation_object: credential.attestation_object.as_deref().map(encode),
    }
}
