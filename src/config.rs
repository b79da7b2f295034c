// src/config.rs

use crate::error::NilaAppleError;
use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Apple's identity provider.
pub const DEFAULT_ISSUER: &str = "https://appleid.apple.com";

/// Apple publishes its key set with no caching hints, so it is held for five minutes.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(300);

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of a generated client secret.
pub const DEFAULT_CLIENT_SECRET_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Apple refuses client secrets valid for longer than six months.
pub const MAX_CLIENT_SECRET_LIFETIME: Duration = Duration::from_secs(86400 * 180);

/// Contains the validation settings for an identity token.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// Tolerance added to `exp` before a token counts as expired.
    /// Defaults to zero.
    pub leeway: Duration,
    /// Whether the `aud` claim must contain the client id. Defaults to `false`.
    pub validate_audience: bool,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            leeway: Duration::ZERO,
            validate_audience: false,
        }
    }
}

/// How the client authenticates at the token endpoint.
#[derive(Clone)]
pub enum ClientSecretConfig {
    /// A secret generated elsewhere and passed through unchanged.
    Static(String),
    /// An ES256 JWT minted from the developer's `.p8` key for every token request.
    SignedJwt {
        team_id: String,
        key_id: String,
        private_key: EncodingKey,
        lifetime: Duration,
    },
}

/// The provider endpoints, derived from the issuer unless overridden.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub authorization: Url,
    pub token: Url,
    pub jwks: Url,
}

/// The main configuration for the Sign in with Apple flow.
///
/// It should be constructed using the `ConfigBuilder`.
#[derive(Clone)]
pub struct Config {
    /// The issuer, kept verbatim: the `iss` claim must equal it exactly.
    pub issuer: String,
    /// The Services ID (web) or bundle id registered with Apple.
    pub client_id: String,
    pub client_secret: ClientSecretConfig,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
    /// When `true`, no `state`/`nonce` is sent and callbacks are not checked for forgery.
    pub stateless: bool,
    pub endpoints: Endpoints,
    pub key_cache_ttl: Duration,
    /// Bound on each outbound HTTP call (token exchange, key-set fetch).
    pub http_timeout: Duration,
    pub validation: ValidationDetails,
}

/// The YAML shape of a [`Config`].
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    pub issuer_url: Option<String>,
    pub client_id: String,
    pub redirect_uri: String,
    pub client_secret: Option<String>,
    pub signed_client_secret: Option<SignedSecretFileConfig>,
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub stateless: bool,
    pub jwks_uri: Option<String>,
    pub key_cache_ttl_seconds: Option<u64>,
    pub http_timeout_seconds: Option<u64>,
    pub leeway_seconds: Option<u64>,
    #[serde(default)]
    pub validate_audience: bool,
}

/// Signed client secret parameters as they appear in YAML.
#[derive(Debug, Deserialize)]
pub struct SignedSecretFileConfig {
    pub team_id: String,
    pub key_id: String,
    /// Path to the `.p8` key. Relative paths resolve against the config file's directory.
    pub private_key_path: PathBuf,
    pub lifetime_seconds: Option<u64>,
}

/// A builder for creating a `Config` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    issuer: Option<String>,
    client_id: Option<String>,
    static_secret: Option<String>,
    signed_secret: Option<(String, String, EncodingKey)>,
    client_secret_lifetime: Option<Duration>,
    redirect_uri: Option<Url>,
    scopes: Option<Vec<String>>,
    stateless: bool,
    jwks_uri_override: Option<Url>,
    key_cache_ttl: Option<Duration>,
    http_timeout: Option<Duration>,
    validation: ValidationDetails,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NilaAppleError> {
        Self::from_file_config(parse_yaml(yaml)?, None)
    }

    /// Seeds a builder from a YAML file on disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, NilaAppleError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            NilaAppleError::InvalidConfiguration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_file_config(parse_yaml(&yaml)?, path.parent())
    }

    fn from_file_config(file: FileConfig, base_dir: Option<&Path>) -> Result<Self, NilaAppleError> {
        let mut builder = Self::new()
            .client_id(file.client_id)
            .redirect_uri(&file.redirect_uri)?
            .stateless(file.stateless)
            .validate_audience(file.validate_audience);

        if let Some(issuer) = &file.issuer_url {
            builder = builder.issuer_url(issuer)?;
        }
        if let Some(secret) = file.client_secret {
            builder = builder.client_secret(secret);
        }
        if let Some(signed) = file.signed_client_secret {
            let key_path = match base_dir {
                Some(dir) if signed.private_key_path.is_relative() => dir.join(&signed.private_key_path),
                _ => signed.private_key_path.clone(),
            };
            let pem = std::fs::read_to_string(&key_path).map_err(|e| {
                NilaAppleError::InvalidConfiguration(format!("Failed to read private key file {:?}: {}", key_path, e))
            })?;
            builder = builder.signed_client_secret(signed.team_id, signed.key_id, &pem)?;
            if let Some(secs) = signed.lifetime_seconds {
                builder = builder.client_secret_lifetime(Duration::from_secs(secs));
            }
        }
        if let Some(scopes) = file.scopes {
            builder = builder.scopes(scopes);
        }
        if let Some(jwks_uri) = &file.jwks_uri {
            builder = builder.jwks_uri(jwks_uri)?;
        }
        if let Some(secs) = file.key_cache_ttl_seconds {
            builder = builder.key_cache_ttl(Duration::from_secs(secs));
        }
        if let Some(secs) = file.http_timeout_seconds {
            builder = builder.http_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = file.leeway_seconds {
            builder = builder.leeway(Duration::from_secs(secs));
        }
        Ok(builder)
    }

    /// Sets the issuer. Defaults to `https://appleid.apple.com`.
    ///
    /// The string is kept as given and compared verbatim with the `iss` claim.
    pub fn issuer_url(mut self, url: &str) -> Result<Self, NilaAppleError> {
        Url::parse(url).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?;
        self.issuer = Some(url.to_string());
        Ok(self)
    }

    /// Sets the client ID of the application. This is a required field.
    pub fn client_id(mut self, client_id: String) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Uses a pre-generated client secret.
    pub fn client_secret(mut self, secret: String) -> Self {
        self.static_secret = Some(secret);
        self
    }

    /// Generates the client secret from a PKCS#8 EC private key (Apple's `.p8` file).
    pub fn signed_client_secret(mut self, team_id: String, key_id: String, private_key_pem: &str) -> Result<Self, NilaAppleError> {
        let key = EncodingKey::from_ec_pem(private_key_pem.as_bytes())
            .map_err(|e| NilaAppleError::InvalidConfiguration(format!("Invalid Apple private key: {}", e)))?;
        self.signed_secret = Some((team_id, key_id, key));
        Ok(self)
    }

    /// Sets how long each generated client secret stays valid.
    pub fn client_secret_lifetime(mut self, lifetime: Duration) -> Self {
        self.client_secret_lifetime = Some(lifetime);
        self
    }

    /// Sets the redirect URI registered with Apple. This is a required field.
    pub fn redirect_uri(mut self, url: &str) -> Result<Self, NilaAppleError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?;
        self.redirect_uri = Some(parsed_url);
        Ok(self)
    }

    /// Sets the requested scopes. Defaults to `name` and `email`.
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Disables the anti-forgery `state`/`nonce` round trip.
    pub fn stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }

    /// Sets an explicit key-set URI instead of `{issuer}/auth/keys`.
    pub fn jwks_uri(mut self, url: &str) -> Result<Self, NilaAppleError> {
        let parsed_url = Url::parse(url).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))?;
        self.jwks_uri_override = Some(parsed_url);
        Ok(self)
    }

    /// Sets how long a fetched key set is served. Defaults to 300 seconds.
    pub fn key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_cache_ttl = Some(ttl);
        self
    }

    /// Sets the timeout of each outbound HTTP call. Defaults to 10 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Sets the clock skew tolerance for `exp`.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    /// Requires the `aud` claim to contain the client id.
    pub fn validate_audience(mut self, validate: bool) -> Self {
        self.validation.validate_audience = validate;
        self
    }

    /// Consumes the builder and returns a `Config` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `client_id`, `redirect_uri` or a client secret is
    /// missing, if both secret kinds are set, or if a value is out of range.
    pub fn build(self) -> Result<Config, NilaAppleError> {
        let client_id = self.client_id.ok_or(NilaAppleError::MissingConfiguration("client_id".to_string()))?;
        let redirect_uri = self.redirect_uri.ok_or(NilaAppleError::MissingConfiguration("redirect_uri".to_string()))?;
        let issuer = self.issuer.unwrap_or_else(|| DEFAULT_ISSUER.to_string());

        let client_secret = match (self.static_secret, self.signed_secret) {
            (Some(_), Some(_)) => {
                return Err(NilaAppleError::InvalidConfiguration(
                    "Both a static client secret and a signing key are configured.".to_string(),
                ));
            }
            (Some(secret), None) => ClientSecretConfig::Static(secret),
            (None, Some((team_id, key_id, private_key))) => {
                let lifetime = self.client_secret_lifetime.unwrap_or(DEFAULT_CLIENT_SECRET_LIFETIME);
                if lifetime.is_zero() || lifetime > MAX_CLIENT_SECRET_LIFETIME {
                    return Err(NilaAppleError::InvalidConfiguration(format!(
                        "client secret lifetime must be between 1 second and {} days",
                        MAX_CLIENT_SECRET_LIFETIME.as_secs() / 86400
                    )));
                }
                ClientSecretConfig::SignedJwt { team_id, key_id, private_key, lifetime }
            }
            (None, None) => return Err(NilaAppleError::MissingConfiguration("client_secret".to_string())),
        };

        let http_timeout = self.http_timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT);
        if http_timeout.is_zero() {
            return Err(NilaAppleError::InvalidConfiguration("http_timeout must be greater than zero".to_string()));
        }

        let endpoints = Endpoints {
            authorization: provider_endpoint(&issuer, "auth/authorize")?,
            token: provider_endpoint(&issuer, "auth/token")?,
            jwks: match self.jwks_uri_override {
                Some(uri) => uri,
                None => provider_endpoint(&issuer, "auth/keys")?,
            },
        };

        Ok(Config {
            issuer,
            client_id,
            client_secret,
            redirect_uri,
            scopes: self.scopes.unwrap_or_else(|| vec!["name".to_string(), "email".to_string()]),
            stateless: self.stateless,
            endpoints,
            key_cache_ttl: self.key_cache_ttl.unwrap_or(DEFAULT_KEY_CACHE_TTL),
            http_timeout,
            validation: self.validation,
        })
    }
}

fn parse_yaml(yaml: &str) -> Result<FileConfig, NilaAppleError> {
    serde_yaml::from_str(yaml).map_err(|e| NilaAppleError::InvalidConfiguration(e.to_string()))
}

fn provider_endpoint(issuer: &str, path: &str) -> Result<Url, NilaAppleError> {
    Url::parse(&format!("{}/{}", issuer.trim_end_matches('/'), path)).map_err(|e| NilaAppleError::InvalidUrl(e.to_string()))
}
