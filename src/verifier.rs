// src/verifier.rs

use crate::config::{Config, ValidationDetails};
use crate::error::NilaAppleError;
use crate::jwks::KeySetCache;
use crate::model::{JsonWebKey, TokenHeader};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use url::Url;

/// An identity token whose signature, issuer and expiry have been checked.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub header: TokenHeader,
    pub claims: Map<String, Value>,
}

impl VerifiedToken {
    /// A string claim, if present.
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// The segments of a token, decoded but not yet trusted.
struct ParsedToken<'a> {
    header: TokenHeader,
    claims: Map<String, Value>,
    /// `base64url(header).base64url(claims)`, exactly as received.
    signing_input: &'a str,
    signature: &'a str,
}

/// The identity token verifier.
///
/// It should be created once and reused; it shares the key-set cache it is
/// given.
#[derive(Clone)]
pub struct TokenVerifier {
    issuer: String,
    client_id: String,
    jwks_uri: Url,
    validation: ValidationDetails,
    key_cache: KeySetCache,
}

impl TokenVerifier {
    /// Creates a new `TokenVerifier` for the issuer and key-set URI in `config`.
    pub fn new(config: &Config, key_cache: KeySetCache) -> Self {
        Self {
            issuer: config.issuer.clone(),
            client_id: config.client_id.clone(),
            jwks_uri: config.endpoints.jwks.clone(),
            validation: config.validation.clone(),
            key_cache,
        }
    }

    /// Verifies an identity token.
    ///
    /// The checks run in this order, and the key set is only consulted once
    /// the token has parsed and its claims are acceptable:
    /// 1. Three base64url segments with JSON header and claims, RS256 header.
    /// 2. `iss` equals the configured issuer, byte for byte.
    /// 3. `exp` has not passed.
    /// 4. `aud` contains the client id, when audience checking is enabled.
    /// 5. Some RSA key in the current key set verifies the signature. Keys
    ///    whose `kid` matches the header are tried first, then every other key.
    #[instrument(skip(self, token), err)]
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, NilaAppleError> {
        let parsed = parse_token(token)?;

        if parsed.header.alg != "RS256" {
            return Err(NilaAppleError::UnsupportedAlgorithm(parsed.header.alg));
        }

        let issuer = parsed.claims.get("iss").and_then(Value::as_str);
        if issuer != Some(self.issuer.as_str()) {
            return Err(NilaAppleError::InvalidIssuer {
                expected: self.issuer.clone(),
                actual: issuer.unwrap_or("<missing>").to_string(),
            });
        }

        let exp = parsed
            .claims
            .get("exp")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
            .ok_or_else(|| NilaAppleError::MissingClaim("exp".to_string()))?;
        let now = self.key_cache.clock().now_secs();
        if exp.saturating_add(self.validation.leeway.as_secs()) <= now {
            debug!("Token expired at {}, now {}", exp, now);
            return Err(NilaAppleError::TokenExpired);
        }

        if self.validation.validate_audience && !audience_contains(parsed.claims.get("aud"), &self.client_id) {
            return Err(NilaAppleError::InvalidAudience);
        }

        let cached = self.key_cache.get_key_set(&self.jwks_uri).await?;
        let candidates = candidate_keys(&cached.key_set.keys, parsed.header.kid.as_deref());
        debug!("Trying {} candidate keys for kid {:?}", candidates.len(), parsed.header.kid);

        for jwk in candidates {
            if verify_with_key(jwk, parsed.signing_input, parsed.signature) {
                debug!("Signature verified with kid {:?}", jwk.kid);
                return Ok(VerifiedToken { header: parsed.header, claims: parsed.claims });
            }
        }

        Err(NilaAppleError::InvalidSignature)
    }
}

fn parse_token(token: &str) -> Result<ParsedToken<'_>, NilaAppleError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(NilaAppleError::MalformedToken(format!("expected 3 segments, found {}", parts.len())));
    }

    let header: TokenHeader = decode_segment(parts[0], "header")?;
    let claims: Map<String, Value> = decode_segment(parts[1], "claims")?;

    Ok(ParsedToken {
        header,
        claims,
        signing_input: &token[..parts[0].len() + 1 + parts[1].len()],
        signature: parts[2],
    })
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, NilaAppleError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| NilaAppleError::MalformedToken(format!("{} is not base64url: {}", name, e)))?;
    serde_json::from_slice(&bytes).map_err(|e| NilaAppleError::MalformedToken(format!("{} is not a JSON object: {}", name, e)))
}

/// Keys able to check RS256, those matching `kid` first.
fn candidate_keys<'a>(keys: &'a [JsonWebKey], kid: Option<&str>) -> Vec<&'a JsonWebKey> {
    let (mut matching, others): (Vec<&JsonWebKey>, Vec<&JsonWebKey>) = keys
        .iter()
        .filter(|k| k.is_rs256_candidate())
        .partition(|k| kid.is_some() && k.kid.as_deref() == kid);
    matching.extend(others);
    matching
}

fn verify_with_key(jwk: &JsonWebKey, signing_input: &str, signature: &str) -> bool {
    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        warn!("Skipping RSA key {:?} without modulus or exponent", jwk.kid);
        return false;
    };
    let key = match DecodingKey::from_rsa_components(n, e) {
        Ok(key) => key,
        Err(err) => {
            warn!("Skipping unusable RSA key {:?}: {}", jwk.kid, err);
            return false;
        }
    };
    match jsonwebtoken::crypto::verify(signature, signing_input.as_bytes(), &key, Algorithm::RS256) {
        Ok(valid) => valid,
        Err(err) => {
            debug!("Signature check with key {:?} errored: {}", jwk.kid, err);
            false
        }
    }
}

fn audience_contains(aud: Option<&Value>, client_id: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == client_id,
        Some(Value::Array(values)) => values.iter().any(|v| v.as_str() == Some(client_id)),
        _ => false,
    }
}
