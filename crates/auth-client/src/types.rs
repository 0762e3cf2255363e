//! Wire types shared with the identity provider.

use serde::{Deserialize, Serialize};

/// Base64url (no padding) serde helper for binary wire fields.
pub(crate) mod b64url {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Result of looking up an email before choosing a sign-in method.
///
/// Fetched once per settled email; never cached beyond the current
/// lookup cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLookup {
    pub exists: bool,
    #[serde(default)]
    pub has_passkey: bool,
    /// A one-time code was already emailed and has not expired.
    #[serde(default)]
    pub has_valid_pending_code: bool,
    #[serde(default)]
    pub rate_limited: bool,
}

/// What a challenge will be consumed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
}

/// Reference to a previously registered credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDescriptor {
    #[serde(with = "b64url")]
    pub id: Vec<u8>,
    #[serde(default)]
    pub transports: Vec<String>,
}

/// Single-use WebAuthn challenge issued by the provider.
///
/// Consumed by exactly one ceremony call and discarded regardless of
/// outcome; an empty `allow_credentials` means a discoverable
/// (resident-key) assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Opaque id echoed back on verification.
    pub challenge_id: String,
    #[serde(with = "b64url")]
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub allow_credentials: Vec<CredentialDescriptor>,
}

/// User object attached to successful verification responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

/// Tokens plus user, returned by credential and code verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub user: AuthUser,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

/// Tokens only, returned by a refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// WebAuthn credential with binary fields re-encoded base64url
/// (padding-free) for JSON transport.
///
/// Registration responses carry `attestation_object`; assertions carry
/// `authenticator_data`, `signature`, and optionally `user_handle`. The
/// inverse decoding is never needed client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortableCredential {
    pub id: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub client_data_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation_object: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_binary_fields_are_base64url() {
        let json = r#"{
            "challengeId": "ch_1",
            "challenge": "AQID",
            "rpId": "example.com",
            "timeoutMs": 60000,
            "allowCredentials": [{"id": "_38", "transports": ["internal"]}]
        }"#;

        let challenge: Challenge = serde_json::from_str(json).unwrap();
        assert_eq!(challenge.challenge, vec![1, 2, 3]);
        assert_eq!(challenge.allow_credentials[0].id, vec![0xff, 0x7f]);

        let round = serde_json::to_value(&challenge).unwrap();
        assert_eq!(round["challenge"], "AQID");
    }

    #[test]
    fn test_lookup_defaults_missing_flags_to_false() {
        let lookup: UserLookup = serde_json::from_str(r#"{"exists": true}"#).unwrap();
        assert!(lookup.exists);
        assert!(!lookup.has_passkey);
        assert!(!lookup.rate_limited);
    }

    #[test]
    fn test_portable_credential_skips_absent_fields() {
        let credential = PortableCredential {
            id: "abc".to_string(),
            credential_type: "public-key".to_string(),
            client_data_json: "e30".to_string(),
            authenticator_data: None,
            signature: None,
            user_handle: None,
            attestation_object: Some("oWc".to_string()),
        };

        let value = serde_json::to_value(&credential).unwrap();
        assert_eq!(value["type"], "public-key");
        assert!(value.get("signature").is_none());
        assert_eq!(value["attestationObject"], "oWc");
    }
}
