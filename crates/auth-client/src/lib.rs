//! Typed client for the remote identity provider.
//!
//! The rest of the workspace talks to the provider exclusively through
//! the [`AuthApi`] trait; [`HttpAuthClient`] is the production
//! implementation. Every call fails with one uniform shape, [`ApiError`],
//! and callers branch only on its `code` and `retryable` fields, never
//! on the prose message.

mod api;
mod error;
mod http;
mod types;

pub use api::AuthApi;
pub use error::{ApiError, ApiErrorCode, ApiResult};
pub use http::HttpAuthClient;
pub use types::{
    AuthUser, Challenge, ChallengePurpose, CredentialDescriptor, PortableCredential,
    RefreshedTokens, TokenGrant, UserLookup,
};
