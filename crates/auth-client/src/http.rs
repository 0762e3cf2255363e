//! HTTP implementation of the remote auth contract.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::api::AuthApi;
use crate::error::{ApiError, ApiErrorCode, ApiResult};
use crate::types::{
    Challenge, ChallengePurpose, PortableCredential, RefreshedTokens, TokenGrant, UserLookup,
};

/// Defensive cap on any single request; the provider's own limits are
/// tighter in practice.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Error body shape the provider uses for non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: ApiErrorCode,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckUserRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChallengeRequest<'a> {
    email: &'a str,
    purpose: ChallengePurpose,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyCredentialRequest<'a> {
    email: &'a str,
    challenge_id: &'a str,
    credential: &'a PortableCredential,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyCodeRequest<'a> {
    email: &'a str,
    code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignOutRequest<'a> {
    refresh_token: &'a str,
}

/// reqwest-backed [`AuthApi`] implementation.
#[derive(Clone)]
pub struct HttpAuthClient {
    http_client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpAuthClient {
    /// Create a client for the given provider base URL and publishable
    /// API key.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> ApiResult<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ApiError::new(ApiErrorCode::Unknown, format!("invalid base URL: {e}"), false))?;
        // Path-bearing bases need the trailing slash so endpoint paths
        // append instead of replacing the last segment.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::new(ApiErrorCode::Unknown, e.to_string(), false))?;

        Ok(Self {
            http_client,
            base_url,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}auth/v1/{}", self.base_url, path)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> ApiResult<T> {
        let url = self.endpoint(path);
        debug!(url = %url, "auth api request");

        let mut request = self
            .http_client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        parse_response(response).await
    }

    /// POST for endpoints whose success response carries no body
    /// (204 or an empty 200).
    async fn post_empty<B: Serialize>(
        &self,
        path: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> ApiResult<()> {
        let url = self.endpoint(path);
        debug!(url = %url, "auth api request");

        let mut request = self
            .http_client
            .post(&url)
            .header("apikey", &self.api_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        parse_empty_response(response).await
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::network("request timed out")
    } else {
        ApiError::network(err.to_string())
    }
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ApiError::new(ApiErrorCode::Server, format!("malformed response: {e}"), true));
    }

    let retry_after_ms = retry_after_hint(&response);
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, "auth api call failed");
    Err(error_from_parts(status, retry_after_ms, &body))
}

/// Like [`parse_response`], but success is the status alone; any body
/// is discarded rather than decoded.
async fn parse_empty_response(response: Response) -> ApiResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let retry_after_ms = retry_after_hint(&response);
    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, "auth api call failed");
    Err(error_from_parts(status, retry_after_ms, &body))
}

fn retry_after_hint(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1000)
}

/// Map an HTTP failure to the uniform error shape.
///
/// 429 is always retryable (with the server's backoff hint when sent),
/// other 4xx are not, and 5xx are. The error body's `code` wins over
/// the status-derived default when it parses.
fn error_from_parts(status: StatusCode, retry_after_ms: Option<u64>, body: &str) -> ApiError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ApiError::rate_limited(retry_after_ms);
    }

    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let retryable = status.is_server_error();

    match parsed {
        Some(ErrorBody { error }) => ApiError {
            code: error.code,
            message: if error.message.is_empty() {
                format!("HTTP {status}")
            } else {
                error.message
            },
            retryable,
            retry_after_ms,
        },
        None => {
            let code = if retryable {
                ApiErrorCode::Server
            } else {
                ApiErrorCode::Unknown
            };
            ApiError::new(code, format!("HTTP {status}"), retryable)
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn check_user(&self, email: &str) -> ApiResult<UserLookup> {
        self.post_json("check-user", &CheckUserRequest { email }, None)
            .await
    }

    async fn get_challenge(
        &self,
        email: &str,
        purpose: ChallengePurpose,
    ) -> ApiResult<Challenge> {
        self.post_json("challenge", &ChallengeRequest { email, purpose }, None)
            .await
    }

    async fn verify_credential(
        &self,
        email: &str,
        challenge_id: &str,
        credential: &PortableCredential,
    ) -> ApiResult<TokenGrant> {
        self.post_json(
            "verify-credential",
            &VerifyCredentialRequest {
                email,
                challenge_id,
                credential,
            },
            None,
        )
        .await
    }

    async fn verify_code(&self, email: &str, code: &str) -> ApiResult<TokenGrant> {
        self.post_json("verify-code", &VerifyCodeRequest { email, code }, None)
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> ApiResult<RefreshedTokens> {
        self.post_json("token/refresh", &RefreshRequest { refresh_token }, None)
            .await
    }

    async fn sign_out(&self, access_token: &str, refresh_token: &str) -> ApiResult<()> {
        // The provider answers 204 with no body.
        self.post_empty(
            "sign-out",
            &SignOutRequest { refresh_token },
            Some(access_token),
        )
        .await
    }
}
