// src/secret.rs

use crate::clock::Clock;
use crate::config::ClientSecretConfig;
use crate::error::NilaAppleError;
use jsonwebtoken::{encode, Algorithm, Header};
use serde::Serialize;

/// Claims of the client secret JWT Apple expects at its token endpoint.
#[derive(Debug, Serialize)]
struct ClientSecretClaims<'a> {
    iss: &'a str,
    iat: u64,
    exp: u64,
    aud: &'a str,
    sub: &'a str,
}

/// Produces the `client_secret` value for one token request.
///
/// A static secret is returned as is. A signing key yields an ES256 JWT
/// issued by the team, for the client, addressed to the issuer.
pub(crate) fn client_secret(
    secret: &ClientSecretConfig,
    client_id: &str,
    audience: &str,
    clock: &dyn Clock,
) -> Result<String, NilaAppleError> {
    match secret {
        ClientSecretConfig::Static(value) => Ok(value.clone()),
        ClientSecretConfig::SignedJwt { team_id, key_id, private_key, lifetime } => {
            let now = clock.now_secs();
            let claims = ClientSecretClaims {
                iss: team_id,
                iat: now,
                exp: now + lifetime.as_secs(),
                aud: audience,
                sub: client_id,
            };
            let mut header = Header::new(Algorithm::ES256);
            header.kid = Some(key_id.clone());

            encode(&header, &claims, private_key).map_err(|e| NilaAppleError::ClientSecretGeneration(e.to_string()))
        }
    }
}
