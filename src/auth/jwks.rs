// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Refresh rules
//!
//! - A lookup against a cache older than the refresh interval first attempts
//!   one refresh. A failed refresh is logged and the cached keys stay usable.
//! - A lookup for an unknown key ID forces exactly one more refresh before
//!   failing.
//! - A successful fetch replaces the key set wholesale and resets the
//!   refresh timestamp. A failed fetch leaves the cache untouched.
//!
//! Concurrent stale lookups may each trigger a fetch. The last writer wins;
//! the write lock is only held for the swap, never across the HTTP request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;

/// Default per-fetch HTTP timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const RSA_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// JWKS fetch and lookup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwksError {
    #[error("failed to fetch JWKS: {0}")]
    Fetch(String),

    #[error("JWKS endpoint returned status {0}")]
    Status(u16),

    #[error("failed to parse JWKS: {0}")]
    Parse(String),

    #[error("key {kid:?} not found and refresh failed: {source}")]
    RefreshFailed {
        kid: String,
        #[source]
        source: Box<JwksError>,
    },

    #[error("key {0:?} not found in JWKS")]
    KeyNotFound(String),

    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// A verification key taken from the JWKS.
#[derive(Clone)]
pub struct CachedKey {
    /// Key ID (`kid`), if the JWK declared one
    pub kid: Option<String>,
    /// Verification key
    pub key: DecodingKey,
    /// Signature algorithms this key may verify
    pub algorithms: Vec<Algorithm>,
}

impl std::fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKey")
            .field("kid", &self.kid)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct CacheEntry {
    keys: Arc<Vec<CachedKey>>,
    last_refresh: Option<Instant>,
}

/// JWKS cache with time-based and on-miss refresh.
///
/// Owned by a single authenticator; refreshed in place.
pub struct JwksCache {
    /// JWKS URL
    jwks_url: String,
    /// Maximum cache age before a lookup refreshes
    refresh_interval: Duration,
    /// Cached keys
    cache: RwLock<CacheEntry>,
    /// HTTP client (carries the per-fetch timeout)
    client: reqwest::Client,
}

impl JwksCache {
    /// Create an empty cache. Nothing is fetched until [`refresh`](Self::refresh)
    /// or the first lookup.
    pub fn new(
        jwks_url: impl Into<String>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self, JwksError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| JwksError::Client(e.to_string()))?;

        Ok(Self {
            jwks_url: jwks_url.into(),
            refresh_interval,
            cache: RwLock::new(CacheEntry::default()),
            client,
        })
    }

    /// Get the JWKS URL.
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Time of the last successful fetch.
    pub async fn last_refresh(&self) -> Option<Instant> {
        self.cache.read().await.last_refresh
    }

    /// Key IDs currently cached, in JWKS order.
    pub async fn key_ids(&self) -> Vec<String> {
        let cache = self.cache.read().await;
        cache.keys.iter().filter_map(|k| k.kid.clone()).collect()
    }

    /// Number of usable keys currently cached.
    pub async fn len(&self) -> usize {
        self.cache.read().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the cache is older than the refresh interval (or never filled).
    pub async fn is_stale(&self) -> bool {
        let cache = self.cache.read().await;
        is_stale(cache.last_refresh, self.refresh_interval)
    }

    /// Fetch the JWKS and replace the cached keys. Returns the key count.
    pub async fn refresh(&self) -> Result<usize, JwksError> {
        let jwks = self.fetch_jwks().await?;
        let keys = convert_keys(&jwks);
        let count = keys.len();

        {
            let mut cache = self.cache.write().await;
            cache.keys = Arc::new(keys);
            cache.last_refresh = Some(Instant::now());
        }

        tracing::debug!(url = %self.jwks_url, key_count = count, "JWKS cache updated");
        Ok(count)
    }

    /// Resolve the candidate verification keys for a key ID.
    ///
    /// An empty `kid` yields every cached key; the caller tries them in order.
    pub async fn resolve(&self, kid: &str) -> Result<Vec<CachedKey>, JwksError> {
        let (mut keys, last_refresh) = self.snapshot().await;

        if is_stale(last_refresh, self.refresh_interval) {
            tracing::debug!(url = %self.jwks_url, "JWKS cache expired, refreshing");
            match self.refresh().await {
                Ok(_) => keys = self.snapshot().await.0,
                Err(e) => {
                    tracing::warn!(
                        url = %self.jwks_url,
                        error = %e,
                        "JWKS refresh failed, using cached keys"
                    );
                }
            }
        }

        let found = select_keys(&keys, kid);
        if !found.is_empty() {
            return Ok(found);
        }

        tracing::debug!(kid, "Key not found, refreshing JWKS");
        if let Err(e) = self.refresh().await {
            return Err(JwksError::RefreshFailed {
                kid: kid.to_string(),
                source: Box::new(e),
            });
        }

        let (keys, _) = self.snapshot().await;
        let found = select_keys(&keys, kid);
        if found.is_empty() {
            let available: Vec<_> = keys.iter().filter_map(|k| k.kid.as_deref()).collect();
            tracing::debug!(kid, ?available, "Key still not found after refresh");
            return Err(JwksError::KeyNotFound(kid.to_string()));
        }
        Ok(found)
    }

    async fn snapshot(&self) -> (Arc<Vec<CachedKey>>, Option<Instant>) {
        let cache = self.cache.read().await;
        (Arc::clone(&cache.keys), cache.last_refresh)
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, JwksError> {
        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(JwksError::Status(response.status().as_u16()));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))
    }
}

fn is_stale(last_refresh: Option<Instant>, refresh_interval: Duration) -> bool {
    last_refresh.is_none_or(|at| at.elapsed() > refresh_interval)
}

fn select_keys(keys: &[CachedKey], kid: &str) -> Vec<CachedKey> {
    if kid.is_empty() {
        return keys.to_vec();
    }
    keys.iter()
        .filter(|k| k.kid.as_deref() == Some(kid))
        .cloned()
        .collect()
}

fn convert_keys(jwks: &JwkSet) -> Vec<CachedKey> {
    jwks.keys
        .iter()
        .filter_map(|jwk| match jwk_to_cached_key(jwk) {
            Ok(key) => Some(key),
            Err(reason) => {
                tracing::warn!(kid = ?jwk.common.key_id, reason, "Skipping JWKS key");
                None
            }
        })
        .collect()
}

/// Convert a JWK to a verification key.
///
/// Symmetric keys are never accepted from a published key set.
fn jwk_to_cached_key(jwk: &Jwk) -> Result<CachedKey, &'static str> {
    let family: Vec<Algorithm> = match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => RSA_ALGORITHMS.to_vec(),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => vec![Algorithm::ES256],
            EllipticCurve::P384 => vec![Algorithm::ES384],
            EllipticCurve::P521 => return Err("P-521 (ES512) keys are not supported"),
            _ => return Err("unsupported elliptic curve"),
        },
        AlgorithmParameters::OctetKeyPair(okp) => match okp.curve {
            EllipticCurve::Ed25519 => vec![Algorithm::EdDSA],
            _ => return Err("unsupported OKP curve"),
        },
        AlgorithmParameters::OctetKey(_) => return Err("symmetric keys are not accepted"),
    };

    let algorithms = match jwk.common.key_algorithm.and_then(signature_algorithm) {
        Some(declared) if family.contains(&declared) => vec![declared],
        Some(_) => return Err("declared algorithm does not match key type"),
        None if jwk.common.key_algorithm.is_some() => {
            return Err("declared algorithm is not a signature algorithm")
        }
        None => family,
    };

    let key = DecodingKey::from_jwk(jwk).map_err(|_| "invalid key material")?;

    Ok(CachedKey {
        kid: jwk.common.key_id.clone(),
        key,
        algorithms,
    })
}

fn signature_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}
