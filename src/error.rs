// src/error.rs

use thiserror::Error;

/// The primary error type for the `nila-apple-signin` library.
///
/// Variants fall into two groups. Transport failures (`NetworkError`) may be
/// retried by the caller. Everything produced while checking the token, its
/// claims or the anti-forgery state is a rejection of the login attempt.
#[derive(Debug, Error)]
pub enum NilaAppleError {
    /// The identity token is not three base64url segments with JSON header and claims.
    #[error("Malformed identity token: {0}")]
    MalformedToken(String),

    /// The `iss` claim does not equal the configured issuer.
    #[error("Invalid issuer: expected '{expected}', found '{actual}'")]
    InvalidIssuer { expected: String, actual: String },

    /// The `exp` claim is in the past.
    #[error("The identity token has expired")]
    TokenExpired,

    /// No key in the current key set verifies the token signature.
    #[error("No key in the key set verifies the token signature")]
    InvalidSignature,

    /// The token header names an algorithm other than RS256.
    #[error("Unsupported JWT algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Audience checking is enabled and `aud` does not contain the client id.
    #[error("The identity token audience does not contain the client id")]
    InvalidAudience,

    /// The anti-forgery state or nonce did not match what was issued.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The key set could not be obtained and nothing fresh is cached.
    #[error("Failed to fetch the JSON Web Key Set: {0}")]
    KeyFetchError(String),

    /// A transport-level failure (timeout, connection, body read) talking to the provider.
    #[error("Network error: {0}")]
    NetworkError(#[source] reqwest::Error),

    /// The callback request could not be parsed (for example, no `code`).
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// A claim required by the flow is absent from the token.
    #[error("A required claim is missing from the token: {0}")]
    MissingClaim(String),

    /// The token endpoint answered with a non-success status.
    #[error("Token exchange failed with HTTP {status}: {}", .error.as_deref().unwrap_or("no error code"))]
    TokenExchangeFailed { status: u16, error: Option<String> },

    /// The signed client secret could not be produced.
    #[error("Failed to generate the client secret: {0}")]
    ClientSecretGeneration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl NilaAppleError {
    /// Whether the failure happened in transport and the attempt may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NilaAppleError::NetworkError(_))
    }

    /// Whether the failure means the login attempt must be rejected outright.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            NilaAppleError::MalformedToken(_)
                | NilaAppleError::InvalidIssuer { .. }
                | NilaAppleError::TokenExpired
                | NilaAppleError::InvalidSignature
                | NilaAppleError::UnsupportedAlgorithm(_)
                | NilaAppleError::InvalidAudience
                | NilaAppleError::InvalidState(_)
                | NilaAppleError::MissingClaim(_)
        )
    }
}
