use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use super::UserIdentity;

const SCOPES: &str = "openid email profile";

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub discovery_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub cache_ttl: Duration,
}

#[derive(Clone)]
pub struct OidcClient {
    config: OidcConfig,
    metadata: Arc<RwLock<Option<ProviderMetadata>>>,
    jwks: Arc<RwLock<Option<JwksCache>>>,
    client: reqwest::Client,
}

/// Subset of the provider's discovery document this service relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

struct JwksCache {
    keys: HashMap<String, CachedDecodingKey>,
    fetched_at: Instant,
}

impl JwksCache {
    fn stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

#[derive(Clone)]
struct CachedDecodingKey {
    key: DecodingKey,
    algorithm: Algorithm,
}

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("discovery document fetch failed: {0}")]
    Discovery(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("token response missing id_token")]
    MissingIdToken,
    #[error("id token header missing kid")]
    MissingKid,
    #[error("unknown jwk key id {0}")]
    UnknownKey(String),
    #[error("unsupported jwt algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("id token nonce mismatch")]
    NonceMismatch,
    #[error("jwt validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("jwks fetch failed: {0}")]
    JwksFetch(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    /// `None` when the provider did not release a usable, verified e-mail address.
    pub fn into_identity(self) -> Option<UserIdentity> {
        let email = self.email.filter(|email| !email.trim().is_empty())?;
        if self.email_verified == Some(false) || self.sub.trim().is_empty() {
            return None;
        }
        Some(UserIdentity {
            id: self.sub,
            name: self.name.unwrap_or_else(|| email.clone()),
            email,
            picture: self.picture.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

impl OidcClient {
    pub fn new(config: OidcConfig) -> Self {
        Self {
            config,
            metadata: Arc::new(RwLock::new(None)),
            jwks: Arc::new(RwLock::new(None)),
            client: reqwest::Client::new(),
        }
    }

    /// Skip discovery, e.g. for a provider without a discovery endpoint.
    pub fn with_metadata(config: OidcConfig, metadata: ProviderMetadata) -> Self {
        Self {
            config,
            metadata: Arc::new(RwLock::new(Some(metadata))),
            jwks: Arc::new(RwLock::new(None)),
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub async fn authorize_url(&self, state: &str, nonce: &str) -> Result<Url, OidcError> {
        let metadata = self.metadata().await?;
        let mut url = Url::parse(&metadata.authorization_endpoint)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", SCOPES)
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        Ok(url)
    }

    /// Redeem an authorization code and return the verified ID token claims.
    pub async fn exchange_code(&self, code: &str, nonce: &str) -> Result<IdTokenClaims, OidcError> {
        let metadata = self.metadata().await?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let resp = self
            .client
            .post(&metadata.token_endpoint)
            .form(&params)
            .send()
            .await?;
        let resp = resp.error_for_status().map_err(|err| {
            OidcError::TokenExchange(format!("status: {}", err.status().unwrap_or_default()))
        })?;
        let body: TokenResponse = resp.json().await?;
        let id_token = body.id_token.ok_or(OidcError::MissingIdToken)?;
        self.verify_id_token(&id_token, nonce).await
    }

    pub async fn verify_id_token(&self, token: &str, nonce: &str) -> Result<IdTokenClaims, OidcError> {
        let metadata = self.metadata().await?;
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(OidcError::MissingKid)?;
        let key = self.decoding_key(&metadata.jwks_uri, &kid).await?;
        let algorithm = select_algorithm(header.alg, key.algorithm)?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&accepted_issuers(&metadata.issuer));
        validation.set_audience(&[self.config.client_id.as_str()]);
        let claims = decode::<IdTokenClaims>(token, &key.key, &validation)?.claims;
        if claims.nonce.as_deref() != Some(nonce) {
            return Err(OidcError::NonceMismatch);
        }
        Ok(claims)
    }

    async fn metadata(&self) -> Result<ProviderMetadata, OidcError> {
        if let Some(metadata) = self.metadata.read().await.as_ref() {
            return Ok(metadata.clone());
        }

        let mut cache = self.metadata.write().await;
        if let Some(metadata) = cache.as_ref() {
            return Ok(metadata.clone());
        }
        let resp = self.client.get(&self.config.discovery_url).send().await?;
        let resp = resp.error_for_status().map_err(|err| {
            OidcError::Discovery(format!("status: {}", err.status().unwrap_or_default()))
        })?;
        let metadata: ProviderMetadata = resp.json().await?;
        *cache = Some(metadata.clone());
        Ok(metadata)
    }

    async fn decoding_key(&self, jwks_uri: &str, kid: &str) -> Result<CachedDecodingKey, OidcError> {
        {
            let cache = self.jwks.read().await;
            if let Some(cache) = cache.as_ref() {
                if !cache.stale(self.config.cache_ttl) {
                    if let Some(key) = cache.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let mut cache = self.jwks.write().await;
        // Providers rotate keys; an unknown kid forces a refetch even when fresh.
        let needs_refresh = cache
            .as_ref()
            .map(|c| c.stale(self.config.cache_ttl) || !c.keys.contains_key(kid))
            .unwrap_or(true);
        if needs_refresh {
            *cache = Some(self.fetch_jwks(jwks_uri).await?);
        }

        cache
            .as_ref()
            .and_then(|c| c.keys.get(kid).cloned())
            .ok_or_else(|| OidcError::UnknownKey(kid.to_string()))
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwksCache, OidcError> {
        let resp = self.client.get(jwks_uri).send().await?;
        let resp = resp.error_for_status().map_err(|err| {
            OidcError::JwksFetch(format!("status: {}", err.status().unwrap_or_default()))
        })?;
        let body: JwksResponse = resp.json().await?;
        let keys = parse_jwks(body)?;
        if keys.is_empty() {
            return Err(OidcError::JwksFetch("no usable keys returned".into()));
        }
        Ok(JwksCache {
            keys,
            fetched_at: Instant::now(),
        })
    }
}

fn parse_jwks(body: JwksResponse) -> Result<HashMap<String, CachedDecodingKey>, OidcError> {
    let mut keys = HashMap::new();
    for Jwk {
        kid,
        kty,
        n,
        e,
        x,
        y,
        crv,
    } in body.keys
    {
        let Some(kid) = kid else {
            continue;
        };
        match kty.as_str() {
            "RSA" => {
                let (Some(n), Some(e)) = (n, e) else {
                    continue;
                };
                keys.insert(
                    kid,
                    CachedDecodingKey {
                        key: DecodingKey::from_rsa_components(&n, &e)?,
                        algorithm: Algorithm::RS256,
                    },
                );
            }
            "EC" => {
                if crv.as_deref() != Some("P-256") {
                    continue;
                }
                let (Some(x), Some(y)) = (x, y) else {
                    continue;
                };
                keys.insert(
                    kid,
                    CachedDecodingKey {
                        key: DecodingKey::from_ec_components(&x, &y)?,
                        algorithm: Algorithm::ES256,
                    },
                );
            }
            _ => continue,
        }
    }
    Ok(keys)
}

/// Google issues tokens with and without the scheme in `iss`.
fn accepted_issuers(issuer: &str) -> Vec<String> {
    let mut issuers = vec![issuer.to_string()];
    if let Some(bare) = issuer.strip_prefix("https://") {
        issuers.push(bare.to_string());
    }
    issuers
}

fn select_algorithm(header_alg: Algorithm, key_alg: Algorithm) -> Result<Algorithm, OidcError> {
    match header_alg {
        Algorithm::RS256 | Algorithm::ES256 if header_alg == key_alg => Ok(header_alg),
        Algorithm::RS256 | Algorithm::ES256 => Err(OidcError::UnsupportedAlgorithm(format!(
            "{header_alg:?} (expected {key_alg:?})"
        ))),
        other => Err(OidcError::UnsupportedAlgorithm(format!("{other:?}"))),
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    n: Option<String>,
    e: Option<String>,
    x: Option<String>,
    y: Option<String>,
    crv: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OidcClient {
        OidcClient::with_metadata(
            OidcConfig {
                discovery_url: "https://accounts.example.com/.well-known/openid-configuration"
                    .into(),
                client_id: "client-123".into(),
                client_secret: "shh".into(),
                redirect_uri: "http://localhost:5000/auth/callback".into(),
                cache_ttl: Duration::from_secs(300),
            },
            ProviderMetadata {
                issuer: "https://accounts.example.com".into(),
                authorization_endpoint: "https://accounts.example.com/o/oauth2/v2/auth".into(),
                token_endpoint: "https://oauth2.example.com/token".into(),
                jwks_uri: "https://www.example.com/oauth2/v3/certs".into(),
            },
        )
    }

    #[tokio::test]
    async fn authorize_url_carries_flow_parameters() {
        let url = client().authorize_url("st4te", "n0nce").await.unwrap();
        assert_eq!(url.host_str(), Some("accounts.example.com"));
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "client-123");
        assert_eq!(query["redirect_uri"], "http://localhost:5000/auth/callback");
        assert_eq!(query["scope"], "openid email profile");
        assert_eq!(query["state"], "st4te");
        assert_eq!(query["nonce"], "n0nce");
    }

    #[tokio::test]
    async fn malformed_id_token_is_rejected() {
        let err = client()
            .verify_id_token("not-a-jwt", "n0nce")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OidcError::Jwt(_)));
    }

    #[test]
    fn claims_without_email_yield_no_identity() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "123",
            "name": "Alice",
        }))
        .unwrap();
        assert!(claims.into_identity().is_none());
    }

    #[test]
    fn claims_map_to_identity() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "123",
            "email": "alice@example.com",
            "email_verified": true,
            "name": "Alice",
            "picture": "https://example.com/a.png",
        }))
        .unwrap();
        let identity = claims.into_identity().unwrap();
        assert_eq!(identity.id, "123");
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.picture, "https://example.com/a.png");
    }

    #[test]
    fn unverified_email_yields_no_identity() {
        let claims: IdTokenClaims = serde_json::from_value(serde_json::json!({
            "sub": "123",
            "email": "alice@example.com",
            "email_verified": false,
        }))
        .unwrap();
        assert!(claims.into_identity().is_none());
    }

    #[test]
    fn issuers_include_schemeless_form() {
        assert_eq!(
            accepted_issuers("https://accounts.google.com"),
            vec!["https://accounts.google.com", "accounts.google.com"]
        );
    }

    #[test]
    fn skips_unusable_jwks_entries() {
        let body: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kid": "oct-1", "kty": "oct" },
                { "kid": "rsa-partial", "kty": "RSA", "n": "abc" },
                { "kid": "ec-384", "kty": "EC", "crv": "P-384", "x": "a", "y": "b" }
            ]
        }))
        .unwrap();
        assert!(parse_jwks(body).unwrap().is_empty());
    }

    #[test]
    fn keys_without_kid_do_not_poison_the_set() {
        let body: JwksResponse = serde_json::from_value(serde_json::json!({
            "keys": [
                { "kty": "RSA", "n": "AQAB", "e": "AQAB" },
                { "kid": "rsa-1", "kty": "RSA", "alg": "RS256", "n": "AQAB", "e": "AQAB" }
            ]
        }))
        .unwrap();
        let keys = parse_jwks(body).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["rsa-1"].algorithm, Algorithm::RS256);
    }
}
