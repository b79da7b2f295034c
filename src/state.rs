// src/state.rs

use crate::error::NilaAppleError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

const RAW_STATE_LEN: usize = 40;

/// The anti-forgery value of one authorization request.
///
/// The hashed state travels as the `state` parameter and the raw state rides
/// inside the `nonce` as `<correlation token>.<raw state>`, so the signed
/// identity token echoes it back. Keep it (e.g. in the session) between the
/// redirect and the callback; checking it consumes it.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthState {
    raw_state: String,
    hashed_state: String,
    correlation_token: String,
}

/// base64url(SHA-256(raw state)), unpadded.
pub fn hash_state(raw_state: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_state.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

impl AuthState {
    /// A new state with a random 40 character raw value.
    pub fn generate() -> Self {
        let raw_state: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(RAW_STATE_LEN)
            .map(char::from)
            .collect();
        Self::from_raw_state(raw_state)
    }

    /// A state around an application supplied raw value.
    pub fn from_raw_state(raw_state: impl Into<String>) -> Self {
        let raw_state = raw_state.into();
        Self {
            hashed_state: hash_state(&raw_state),
            raw_state,
            correlation_token: Uuid::new_v4().to_string(),
        }
    }

    pub fn raw_state(&self) -> &str {
        &self.raw_state
    }

    /// The value sent as the `state` query parameter.
    pub fn hashed_state(&self) -> &str {
        &self.hashed_state
    }

    pub fn correlation_token(&self) -> &str {
        &self.correlation_token
    }

    /// The value sent as the `nonce` query parameter.
    pub fn nonce(&self) -> String {
        format!("{}.{}", self.correlation_token, self.raw_state)
    }

    /// Checks the callback's `state` parameter and the token's `nonce` claim
    /// against this state.
    pub fn verify(self, received_state: Option<&str>, nonce_claim: Option<&str>) -> Result<(), NilaAppleError> {
        let nonce = nonce_claim.ok_or_else(|| NilaAppleError::MissingClaim("nonce".to_string()))?;
        let received_state =
            received_state.ok_or_else(|| NilaAppleError::InvalidState("the callback carries no state".to_string()))?;

        if !constant_time_eq(received_state, &self.hashed_state) {
            return Err(NilaAppleError::InvalidState("state does not match the issued state".to_string()));
        }

        let (correlation_token, raw_state) = nonce
            .split_once('.')
            .ok_or_else(|| NilaAppleError::InvalidState("nonce is not of the form '<token>.<state>'".to_string()))?;

        if !constant_time_eq(&hash_state(raw_state), received_state) {
            return Err(NilaAppleError::InvalidState("nonce does not carry the issued state".to_string()));
        }
        if !constant_time_eq(correlation_token, &self.correlation_token) {
            return Err(NilaAppleError::InvalidState("nonce correlation token does not match".to_string()));
        }

        debug!("Anti-forgery state verified");
        Ok(())
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
