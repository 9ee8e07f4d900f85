// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SPIFFE JWT-SVID authentication.
//!
//! SVIDs are validated against JWT bundles from the local SPIFFE Workload
//! API, with this server's own SPIFFE ID as the required audience. On top of
//! the cryptographic check the authenticator enforces the configured trust
//! domain and, optionally, a client allow-list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use spiffe::bundle::jwt::JwtBundleSet;
use spiffe::svid::jwt::JwtSvid;
use spiffe::workload_api::client::WorkloadApiClient;
use tokio::sync::{Mutex, RwLock};

use super::spiffe_id::SpiffeId;
use super::{AuthMode, Authenticator, Identity};
use crate::config::SpiffeConfig;
use crate::error::AuthError;

/// Bound on connecting to the Workload API and on each bundle fetch.
pub const WORKLOAD_API_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum age of cached JWT bundles.
const BUNDLE_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Minimum spacing between refetches triggered by a failed validation.
const FORCED_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// JWT-SVID validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SvidError {
    #[error("failed to connect to Workload API: {0}")]
    Connect(String),

    #[error("failed to fetch JWT bundles: {0}")]
    Bundles(String),

    #[error("invalid JWT-SVID: {0}")]
    Invalid(String),

    #[error("Workload API connection closed")]
    Closed,
}

/// A JWT-SVID that passed signature and audience validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSvid {
    /// Caller SPIFFE ID
    pub spiffe_id: String,
    /// Token audience
    pub audience: Vec<String>,
    /// Raw claim set
    pub claims: HashMap<String, Value>,
}

/// Cryptographic JWT-SVID validation.
#[async_trait]
pub trait SvidValidator: Send + Sync {
    /// Validate `token` and require `audience` in its `aud` claim.
    async fn validate(&self, token: &str, audience: &str) -> Result<ValidatedSvid, SvidError>;

    /// Release any connection held by the validator.
    async fn close(&self) {}
}

/// Where a [`BundleCache`] gets its bundles from.
#[async_trait]
trait BundleSource: Send + Sync {
    type Bundles: Send + Sync;

    async fn fetch(&self) -> Result<Self::Bundles, SvidError>;

    async fn close(&self) {}
}

/// Workload API connection used as a bundle source.
struct WorkloadApiSource {
    client: Mutex<Option<WorkloadApiClient>>,
}

#[async_trait]
impl BundleSource for WorkloadApiSource {
    type Bundles = JwtBundleSet;

    async fn fetch(&self) -> Result<JwtBundleSet, SvidError> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(SvidError::Closed)?;
        tokio::time::timeout(WORKLOAD_API_TIMEOUT, client.fetch_jwt_bundles())
            .await
            .map_err(|_| SvidError::Bundles("timed out".to_string()))?
            .map_err(|e| SvidError::Bundles(e.to_string()))
    }

    async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            tracing::info!("SPIFFE Workload API connection closed");
        }
    }
}

struct CachedBundles<B> {
    bundles: Arc<B>,
    fetched_at: Instant,
}

/// Bundles from a [`BundleSource`], refetched once older than `max_age`.
///
/// Refetches requested after a failed validation are spaced at least
/// `cooldown` apart.
struct BundleCache<S: BundleSource> {
    source: S,
    max_age: Duration,
    cooldown: Duration,
    cached: RwLock<Option<CachedBundles<S::Bundles>>>,
    last_forced_refresh: Mutex<Option<Instant>>,
}

impl<S: BundleSource> BundleCache<S> {
    fn new(source: S, max_age: Duration, cooldown: Duration) -> Self {
        Self {
            source,
            max_age,
            cooldown,
            cached: RwLock::new(None),
            last_forced_refresh: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<Arc<S::Bundles>, SvidError> {
        let bundles = Arc::new(self.source.fetch().await?);
        *self.cached.write().await = Some(CachedBundles {
            bundles: Arc::clone(&bundles),
            fetched_at: Instant::now(),
        });
        tracing::debug!("SPIFFE JWT bundles refreshed");
        Ok(bundles)
    }

    /// Cached bundles, refetched first when stale. A failed refetch keeps
    /// serving the stale set.
    async fn current(&self) -> Result<Arc<S::Bundles>, SvidError> {
        let cached = {
            let guard = self.cached.read().await;
            guard
                .as_ref()
                .map(|c| (Arc::clone(&c.bundles), c.fetched_at.elapsed()))
        };

        match cached {
            Some((bundles, age)) if age <= self.max_age => Ok(bundles),
            Some((bundles, _)) => match self.refresh().await {
                Ok(fresh) => Ok(fresh),
                Err(e) => {
                    tracing::warn!(error = %e, "JWT bundle refresh failed, using cached bundles");
                    Ok(bundles)
                }
            },
            None => self.refresh().await,
        }
    }

    /// Refetch unless another forced refetch happened within the cooldown.
    /// Returns the new bundles on a successful refetch.
    async fn force_refresh(&self) -> Option<Arc<S::Bundles>> {
        {
            let mut last = self.last_forced_refresh.lock().await;
            if last.is_some_and(|at| at.elapsed() < self.cooldown) {
                return None;
            }
            *last = Some(Instant::now());
        }

        self.refresh()
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Forced JWT bundle refresh failed"))
            .ok()
    }

    async fn close(&self) {
        self.source.close().await;
    }
}

/// [`SvidValidator`] backed by the SPIFFE Workload API.
pub struct WorkloadApiValidator {
    bundles: BundleCache<WorkloadApiSource>,
}

impl WorkloadApiValidator {
    /// Connect to the Workload API and load the initial JWT bundles.
    ///
    /// `socket` overrides the `SPIFFE_ENDPOINT_SOCKET` environment variable.
    pub async fn connect(socket: Option<&str>) -> Result<Self, SvidError> {
        let connect = async {
            match socket {
                Some(path) => WorkloadApiClient::new_from_path(path).await,
                None => WorkloadApiClient::default().await,
            }
        };

        let client = tokio::time::timeout(WORKLOAD_API_TIMEOUT, connect)
            .await
            .map_err(|_| SvidError::Connect("timed out".to_string()))?
            .map_err(|e| SvidError::Connect(e.to_string()))?;

        let source = WorkloadApiSource {
            client: Mutex::new(Some(client)),
        };
        let validator = Self {
            bundles: BundleCache::new(source, BUNDLE_REFRESH_INTERVAL, FORCED_REFRESH_COOLDOWN),
        };
        validator.bundles.refresh().await?;
        Ok(validator)
    }
}

#[async_trait]
impl SvidValidator for WorkloadApiValidator {
    async fn validate(&self, token: &str, audience: &str) -> Result<ValidatedSvid, SvidError> {
        let bundles = self.bundles.current().await?;

        let err = match JwtSvid::parse_and_validate(token, bundles.as_ref(), &[audience]) {
            Ok(svid) => return Ok(validated(token, &svid)),
            Err(e) => e,
        };

        // A rotated bundle may not have reached us yet.
        if let Some(fresh) = self.bundles.force_refresh().await {
            if let Ok(svid) = JwtSvid::parse_and_validate(token, fresh.as_ref(), &[audience]) {
                return Ok(validated(token, &svid));
            }
        }

        Err(SvidError::Invalid(err.to_string()))
    }

    async fn close(&self) {
        self.bundles.close().await;
    }
}

fn validated(token: &str, svid: &JwtSvid) -> ValidatedSvid {
    // Signature already verified; this only recovers the raw claim set.
    let claims = jsonwebtoken::dangerous::insecure_decode::<HashMap<String, Value>>(token)
        .map(|data| data.claims)
        .unwrap_or_default();

    ValidatedSvid {
        spiffe_id: svid.spiffe_id().to_string(),
        audience: svid.audience().to_vec(),
        claims,
    }
}

/// Authenticator for SPIFFE JWT-SVIDs.
pub struct SpiffeAuthenticator {
    config: SpiffeConfig,
    server_id: SpiffeId,
    allowed_clients: HashSet<String>,
    validator: Box<dyn SvidValidator>,
}

impl SpiffeAuthenticator {
    /// Connect to the Workload API and build the authenticator.
    pub async fn new(config: SpiffeConfig) -> Result<Self, AuthError> {
        let validator = WorkloadApiValidator::connect(config.endpoint_socket.as_deref())
            .await
            .map_err(|e| AuthError::Initialization(e.to_string()))?;
        Self::with_validator(config, validator)
    }

    /// Build the authenticator around an existing validator.
    pub fn with_validator(
        config: SpiffeConfig,
        validator: impl SvidValidator + 'static,
    ) -> Result<Self, AuthError> {
        let server_id = SpiffeId::parse(&config.server_id).map_err(|e| {
            AuthError::Initialization(format!("invalid server SPIFFE ID {:?}: {e}", config.server_id))
        })?;
        let allowed_clients = config.allowed_clients.iter().cloned().collect();

        tracing::info!(
            trust_domain = %config.trust_domain,
            server_id = %server_id,
            allowed_clients = config.allowed_clients.len(),
            "SPIFFE authenticator initialized"
        );

        Ok(Self {
            config,
            server_id,
            allowed_clients,
            validator: Box::new(validator),
        })
    }
}

#[async_trait]
impl Authenticator for SpiffeAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let svid = self
            .validator
            .validate(token, self.server_id.as_str())
            .await
            .map_err(|e| AuthError::InvalidToken(format!("failed to validate JWT-SVID: {e}")))?;

        let caller = SpiffeId::parse(&svid.spiffe_id)
            .map_err(|e| AuthError::InvalidToken(format!("invalid SPIFFE ID: {e}")))?;

        if !caller.is_member_of(&self.config.trust_domain) {
            return Err(AuthError::InvalidIssuer(format!(
                "expected trust domain {}, got {}",
                self.config.trust_domain,
                caller.trust_domain()
            )));
        }

        if !self.allowed_clients.is_empty() && !self.allowed_clients.contains(caller.as_str()) {
            return Err(AuthError::InvalidToken(format!(
                "client {caller} is not allowed"
            )));
        }

        Ok(Identity::new(caller.to_string(), AuthMode::Spiffe)
            .with_issuer(self.config.trust_domain.clone())
            .with_audience(svid.audience)
            .with_claims(svid.claims))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Spiffe
    }

    async fn close(&self) {
        self.validator.close().await;
    }
}
