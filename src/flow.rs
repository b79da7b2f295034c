// src/flow.rs

use crate::claims;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::NilaAppleError;
use crate::jwks::KeySetCache;
use crate::model::{CallbackParams, IdentityResult, TokenResponse};
use crate::secret;
use crate::state::AuthState;
use crate::verifier::{TokenVerifier, VerifiedToken};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Where to send the user, and the state to keep until they come back.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    /// `None` when the client is configured as stateless.
    pub state: Option<AuthState>,
}

/// The error body of the token endpoint, e.g. `{"error":"invalid_grant"}`.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: Option<String>,
}

/// Drives a Sign in with Apple login from the authorization redirect to a
/// verified [`IdentityResult`].
#[derive(Clone)]
pub struct AuthFlowClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    http_client: reqwest::Client,
    verifier: TokenVerifier,
    clock: Arc<dyn Clock>,
}

impl AuthFlowClient {
    /// Creates a client with its own key-set cache built from `config`.
    pub fn new(config: Config) -> Result<Self, NilaAppleError> {
        let key_cache = KeySetCache::new(config.key_cache_ttl, config.http_timeout)?;
        Self::with_key_cache(config, key_cache)
    }

    /// Creates a client that verifies tokens against the given cache,
    /// e.g. [`KeySetCache::shared`]. The cache's clock is used for every time check.
    pub fn with_key_cache(config: Config, key_cache: KeySetCache) -> Result<Self, NilaAppleError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NilaAppleError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                verifier: TokenVerifier::new(&config, key_cache.clone()),
                clock: key_cache.clock(),
                config,
                http_client,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    /// Builds the authorization URL.
    ///
    /// Unless the client is stateless, a fresh [`AuthState`] is generated; its
    /// hashed value is sent as `state` and its nonce as `nonce`.
    pub fn authorization_request(&self) -> AuthorizationRequest {
        let state = (!self.inner.config.stateless).then(AuthState::generate);
        self.build_authorization_request(state)
    }

    /// Builds the authorization URL around a state the application created,
    /// e.g. with [`AuthState::from_raw_state`]. The state is sent even when
    /// the client is configured as stateless.
    pub fn authorization_request_with(&self, state: AuthState) -> AuthorizationRequest {
        self.build_authorization_request(Some(state))
    }

    fn build_authorization_request(&self, state: Option<AuthState>) -> AuthorizationRequest {
        let config = &self.inner.config;
        let mut url = config.endpoints.authorization.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &config.client_id)
                .append_pair("redirect_uri", config.redirect_uri.as_str())
                .append_pair("response_type", "code")
                .append_pair("scope", &config.scopes.join(" "))
                .append_pair("response_mode", "form_post");
            if let Some(state) = &state {
                query.append_pair("state", state.hashed_state()).append_pair("nonce", &state.nonce());
            }
        }

        debug!("Built authorization URL (with state: {})", state.is_some());
        AuthorizationRequest { url, state }
    }

    /// Exchanges an authorization code at the token endpoint.
    #[instrument(skip(self, code), err)]
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, NilaAppleError> {
        let redirect_uri = self.inner.config.redirect_uri.as_str();
        self.request_tokens(&[
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    /// Redeems a refresh token. Apple answers with a new access token only.
    #[instrument(skip(self, refresh_token), err)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, NilaAppleError> {
        self.request_tokens(&[("refresh_token", refresh_token), ("grant_type", "refresh_token")])
            .await
    }

    /// Verifies an identity token obtained out of band, e.g. from a native app.
    pub async fn verify_id_token(&self, id_token: &str) -> Result<VerifiedToken, NilaAppleError> {
        self.inner.verifier.verify(id_token).await
    }

    /// Completes a login from the parameters posted to the redirect URI.
    ///
    /// `expected` is the state returned by [`Self::authorization_request`]
    /// for this user; it is required unless the client is stateless.
    #[instrument(skip(self, params, expected), err)]
    pub async fn callback(
        &self,
        params: CallbackParams,
        expected: Option<AuthState>,
    ) -> Result<IdentityResult, NilaAppleError> {
        let stateless = self.inner.config.stateless;
        if !stateless && expected.is_none() {
            return Err(NilaAppleError::InvalidState("no state was issued for this callback".to_string()));
        }

        let tokens = self.exchange_code(&params.code).await?;
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or_else(|| NilaAppleError::MissingClaim("id_token".to_string()))?;

        let verified = self.inner.verifier.verify(id_token).await?;
        if verified.claim_str("sub").is_none() {
            return Err(NilaAppleError::MissingClaim("sub".to_string()));
        }

        if let Some(expected) = expected.filter(|_| !stateless) {
            expected.verify(params.state.as_deref(), verified.claim_str("nonce"))?;
        }

        let user = params.user_payload();
        let identity = claims::extract(verified.claims, user.as_ref().and_then(|u| u.name.as_ref())).with_tokens(&tokens);
        info!("Sign in with Apple completed for subject {}", identity.id);
        Ok(identity)
    }

    /// POSTs a grant to the token endpoint with the client's credentials.
    async fn request_tokens(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, NilaAppleError> {
        let config = &self.inner.config;
        let client_secret =
            secret::client_secret(&config.client_secret, &config.client_id, &config.issuer, self.inner.clock.as_ref())?;

        let mut form = vec![("client_id", config.client_id.as_str()), ("client_secret", client_secret.as_str())];
        form.extend_from_slice(grant);

        let response = self
            .inner
            .http_client
            .post(config.endpoints.token.clone())
            .basic_auth(&config.client_id, Some(&client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(NilaAppleError::NetworkError)?;

        let status = response.status();
        let body = response.bytes().await.map_err(NilaAppleError::NetworkError)?;

        if !status.is_success() {
            let error = serde_json::from_slice::<TokenErrorBody>(&body).ok().and_then(|b| b.error);
            warn!("Token endpoint answered HTTP {} ({:?})", status, error);
            return Err(NilaAppleError::TokenExchangeFailed { status: status.as_u16(), error });
        }

        let tokens: TokenResponse = serde_json::from_slice(&body).map_err(|e| NilaAppleError::TokenExchangeFailed {
            status: status.as_u16(),
            error: Some(format!("unreadable token response: {}", e)),
        })?;
        debug!("Token endpoint returned an id_token: {}", tokens.id_token.is_some());
        Ok(tokens)
    }
}
