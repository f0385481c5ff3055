//! Identity-token verification against a published JWKS (RS256)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::constants::{GOOGLE_ISSUERS, JWKS_CACHE_SECS, JWKS_MIN_REFRESH_SECS};

/// Who the caller is, once their token checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaim {
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("token header has no key id")]
    MissingKeyId,
    #[error("no signing key with id {0}")]
    UnknownKey(String),
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(#[from] reqwest::Error),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Checks signature, expiry, issuer, and that the audience is our client id.
    async fn verify(&self, token: &str) -> Result<IdentityClaim, VerifyError>;
}

#[derive(Debug, Deserialize)]
struct IdClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

impl CachedKeys {
    fn lookup(&self, kid: &str, remote: bool) -> Option<&Jwk> {
        let fresh = !remote || self.fetched_at.elapsed() < Duration::from_secs(JWKS_CACHE_SECS);
        if fresh { self.set.find(kid) } else { None }
    }
}

#[derive(Default)]
struct KeyCache {
    keys: Option<CachedKeys>,
    // Set on every fetch attempt, successful or not.
    last_fetch: Option<Instant>,
}

/// Verifies tokens with keys from a JWKS endpoint, refetched hourly or when
/// a token names a key id we have not seen.
///
/// Refetches for unknown key ids are limited to one per
/// `JWKS_MIN_REFRESH_SECS`, and concurrent misses share a single fetch.
pub struct JwksVerifier {
    audience: String,
    issuers: Vec<String>,
    jwks_url: Option<String>,
    http: reqwest::Client,
    cache: RwLock<KeyCache>,
}

impl JwksVerifier {
    pub fn new(audience: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            issuers: GOOGLE_ISSUERS.iter().map(|s| s.to_string()).collect(),
            jwks_url: Some(jwks_url.into()),
            http: reqwest::Client::new(),
            cache: RwLock::new(KeyCache::default()),
        }
    }

    /// Fixed key set that is never refetched.
    #[cfg(test)]
    pub fn with_keys(audience: impl Into<String>, set: JwkSet) -> Self {
        Self {
            audience: audience.into(),
            issuers: GOOGLE_ISSUERS.iter().map(|s| s.to_string()).collect(),
            jwks_url: None,
            http: reqwest::Client::new(),
            cache: RwLock::new(KeyCache {
                keys: Some(CachedKeys {
                    set,
                    fetched_at: Instant::now(),
                }),
                last_fetch: None,
            }),
        }
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, VerifyError> {
        let remote = self.jwks_url.is_some();
        {
            let cache = self.cache.read().await;
            if let Some(jwk) = cache.keys.as_ref().and_then(|k| k.lookup(kid, remote)) {
                return Ok(DecodingKey::from_jwk(jwk)?);
            }
        }

        let Some(url) = self.jwks_url.as_deref() else {
            return Err(VerifyError::UnknownKey(kid.to_string()));
        };

        // Held across the fetch so concurrent misses wait for one request.
        let mut cache = self.cache.write().await;
        if let Some(jwk) = cache.keys.as_ref().and_then(|k| k.lookup(kid, remote)) {
            return Ok(DecodingKey::from_jwk(jwk)?);
        }
        // Failed fetches count too, so an unreachable key endpoint is not retried per request.
        let throttled = cache
            .last_fetch
            .is_some_and(|at| at.elapsed() < Duration::from_secs(JWKS_MIN_REFRESH_SECS));
        if throttled {
            tracing::debug!(%kid, "Unknown key id; refresh throttled");
            return Err(VerifyError::UnknownKey(kid.to_string()));
        }

        tracing::debug!(%url, %kid, "Refreshing signing keys");
        cache.last_fetch = Some(Instant::now());
        let set: JwkSet = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let cached = cache.keys.insert(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        let jwk = cached
            .set
            .find(kid)
            .ok_or_else(|| VerifyError::UnknownKey(kid.to_string()))?;
        Ok(DecodingKey::from_jwk(jwk)?)
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityClaim, VerifyError> {
        let header = decode_header(token)?;
        let kid = header.kid.ok_or(VerifyError::MissingKeyId)?;
        let key = self.key_for(&kid).await?;

        // RS256 only, so a token cannot pick its own algorithm.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&self.issuers);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let data = decode::<IdClaims>(token, &key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => VerifyError::Expired,
            _ => VerifyError::Invalid(e),
        })?;

        Ok(IdentityClaim {
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }
}
