//! Bearer token verification against the published key set.
//!
//! Decoding a token without checking its signature is never sufficient: the
//! verifier resolves the signing key for the token's key id from the
//! published JWKS document and verifies the RS256 signature before any claim
//! is trusted. The key set is cached for a bounded duration and fetches are
//! rate limited so an attacker replaying garbage tokens cannot turn this
//! client into a hammer against the key publisher.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::constants::{JWKS_URL, KEY_SET_CACHE_TTL, KEY_SET_FETCHES_PER_MINUTE, USER_AGENT};
use crate::error::TokenError;

/// One published signing key.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key id referenced by token headers.
    pub kid: String,
    /// Key type; only RSA keys are usable here.
    pub kty: String,
    /// RSA modulus, base64url.
    pub n: String,
    /// RSA public exponent, base64url.
    pub e: String,
    /// Advertised algorithm, if any.
    #[serde(default)]
    pub alg: Option<String>,
}

/// A published key set (JWKS document).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeySet {
    pub keys: Vec<Jwk>,
}

/// Where the key set comes from. The production source fetches the JWKS URL;
/// tests substitute an in-memory set.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_keys(&self) -> Result<KeySet>;
}

/// HTTP key source for the published JWKS endpoint.
pub struct HttpKeySource {
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_keys(&self) -> Result<KeySet> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to create HTTP client")?;

        let set = client
            .get(&self.url)
            .send()
            .await
            .context("key set request failed")?
            .error_for_status()
            .context("key set endpoint returned an error")?
            .json::<KeySet>()
            .await
            .context("key set response is not valid JWKS")?;

        debug!(url = %self.url, keys = set.keys.len(), "fetched signing key set");
        Ok(set)
    }
}

/// Claims of a successfully verified token, normalized for the rest of the
/// application.
#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    pub user_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    /// Unix timestamp of the token's expiry claim.
    pub expires_at: i64,
}

/// Raw claim layout as issued. Identity fields accept both snake_case and
/// OIDC standard names.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    exp: i64,
    email: String,
    #[serde(default, alias = "given_name")]
    first_name: Option<String>,
    #[serde(default, alias = "family_name")]
    last_name: Option<String>,
    #[serde(default, alias = "picture")]
    image_url: Option<String>,
}

struct KeyCache {
    keys: Vec<Jwk>,
    fetched_at: Option<Instant>,
}

/// Small token bucket guarding the key set endpoint.
struct FetchBudget {
    tokens: f64,
    last_refill: Instant,
}

impl FetchBudget {
    fn new() -> Self {
        Self {
            tokens: f64::from(KEY_SET_FETCHES_PER_MINUTE),
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed / 60.0 * f64::from(KEY_SET_FETCHES_PER_MINUTE))
            .min(f64::from(KEY_SET_FETCHES_PER_MINUTE));
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Signature, expiry and not-before verification for bearer tokens.
pub struct TokenVerifier {
    source: Box<dyn KeySource>,
    cache: Mutex<KeyCache>,
    fetch_budget: Mutex<FetchBudget>,
}

impl TokenVerifier {
    /// Verifier against the production JWKS endpoint.
    pub fn new() -> Self {
        Self::with_source(Box::new(HttpKeySource::new(JWKS_URL)))
    }

    /// Verifier with a custom key source.
    pub fn with_source(source: Box<dyn KeySource>) -> Self {
        Self {
            source,
            cache: Mutex::new(KeyCache {
                keys: Vec::new(),
                fetched_at: None,
            }),
            fetch_budget: Mutex::new(FetchBudget::new()),
        }
    }

    /// Verify `token` and return its normalized claims.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        if header.alg != Algorithm::RS256 {
            return Err(TokenError::Malformed(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| TokenError::Malformed("token header has no key id".to_string()))?;

        let jwk = self.resolve_key(&kid).await?;
        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|_| TokenError::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::ImmatureSignature => TokenError::NotYetValid,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;

        let claims = data.claims;
        Ok(VerifiedClaims {
            user_id: claims.sub,
            email: claims.email,
            first_name: claims.first_name,
            last_name: claims.last_name,
            image_url: claims.image_url,
            expires_at: claims.exp,
        })
    }

    /// Find the key for `kid`, refreshing the cached set when it is stale or
    /// does not know the key id (key rotation). Refreshes are bounded by the
    /// fetch budget; a stale cache keeps serving while the endpoint is
    /// unreachable.
    async fn resolve_key(&self, kid: &str) -> Result<Jwk, TokenError> {
        if let Some(jwk) = self.cached_key(kid, true) {
            return Ok(jwk);
        }

        let may_fetch = {
            let mut budget = self
                .fetch_budget
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            budget.try_consume()
        };

        if may_fetch {
            match self.source.fetch_keys().await {
                Ok(set) => {
                    let mut cache = self
                        .cache
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    cache.keys = set.keys;
                    cache.fetched_at = Some(Instant::now());
                }
                Err(e) => {
                    warn!(error = %e, "key set fetch failed, falling back to cached keys");
                }
            }
        } else {
            warn!("key set fetch budget exhausted, falling back to cached keys");
        }

        self.cached_key(kid, false)
            .ok_or_else(|| TokenError::UnknownKey(kid.to_string()))
    }

    fn cached_key(&self, kid: &str, require_fresh: bool) -> Option<Jwk> {
        let cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if require_fresh {
            let fresh = cache
                .fetched_at
                .is_some_and(|at| at.elapsed() < KEY_SET_CACHE_TTL);
            if !fresh {
                return None;
            }
        }
        cache.keys.iter().find(|key| key.kid == kid).cloned()
    }
}

impl Default for TokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}
