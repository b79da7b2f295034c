// src/model.rs

use crate::error::NilaAppleError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

impl JsonWebKey {
    /// Whether this key can check an RS256 signature.
    pub fn is_rs256_candidate(&self) -> bool {
        self.kty == "RSA"
            && self.alg.as_deref().map_or(true, |alg| alg == "RS256")
            && self.use_purpose.as_deref().map_or(true, |u| u == "sig")
    }
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// The decoded header segment of an identity token.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenHeader {
    pub alg: String,
    pub kid: Option<String>,
    pub typ: Option<String>,
}

/// The token endpoint response.
///
/// `id_token` and `refresh_token` are absent when the response answers a
/// refresh-token grant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

/// The structured name Apple posts back in the `user` field, on the first authorization only.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserName {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// The `user` JSON payload of the form-post callback.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppleUser {
    pub name: Option<UserName>,
    pub email: Option<String>,
}

/// Parameters received on the redirect URI.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
    /// Raw JSON of the `user` field, if Apple sent one.
    pub user: Option<String>,
}

impl CallbackParams {
    /// Parses an `application/x-www-form-urlencoded` callback body.
    pub fn from_form(body: &str) -> Result<Self, NilaAppleError> {
        serde_urlencoded::from_str(body).map_err(|e| NilaAppleError::InvalidCallback(e.to_string()))
    }

    /// The decoded `user` payload. A payload that is not valid JSON is dropped.
    pub fn user_payload(&self) -> Option<AppleUser> {
        let raw = self.user.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!("Ignoring malformed 'user' payload in callback: {}", e);
                None
            }
        }
    }
}

/// The normalized identity produced at the end of a successful sign in.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentityResult {
    /// The stable Apple user identifier (`sub`).
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub is_private_email: bool,
    /// Every claim of the verified token, untouched.
    pub raw_claims: Map<String, Value>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl IdentityResult {
    /// Attaches the tokens returned by the token endpoint.
    pub fn with_tokens(mut self, tokens: &TokenResponse) -> Self {
        self.access_token = Some(tokens.access_token.clone());
        self.refresh_token = tokens.refresh_token.clone();
        self.expires_in = tokens.expires_in;
        self
    }
}
