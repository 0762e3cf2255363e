//! Remote auth contract consumed by the sign-in and session cores.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{
    Challenge, ChallengePurpose, PortableCredential, RefreshedTokens, TokenGrant, UserLookup,
};

/// HTTP contract of the identity provider.
///
/// The provider itself is a separate system; everything in this
/// workspace depends only on these request/response and error shapes.
/// Implementations must be usable behind `Arc<dyn AuthApi>`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Look up an email ahead of method selection.
    async fn check_user(&self, email: &str) -> ApiResult<UserLookup>;

    /// Fetch a single-use WebAuthn challenge.
    async fn get_challenge(&self, email: &str, purpose: ChallengePurpose)
        -> ApiResult<Challenge>;

    /// Verify a completed ceremony against its challenge.
    async fn verify_credential(
        &self,
        email: &str,
        challenge_id: &str,
        credential: &PortableCredential,
    ) -> ApiResult<TokenGrant>;

    /// Verify an emailed one-time code or magic-link token.
    async fn verify_code(&self, email: &str, code: &str) -> ApiResult<TokenGrant>;

    /// Exchange a refresh token for a fresh token pair.
    async fn refresh_token(&self, refresh_token: &str) -> ApiResult<RefreshedTokens>;

    /// Revoke the session server-side. Callers treat failures as
    /// best-effort and clear local state regardless.
    async fn sign_out(&self, access_token: &str, refresh_token: &str) -> ApiResult<()>;
}
