// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Pluggable request authentication for Axum services.
//!
//! ## Auth Flow
//!
//! 1. Caller sends a token in `Authorization` (`Bearer <token>` or raw), or
//!    in a configured custom header for Dapr Sentry tokens
//! 2. [`middleware::auth_middleware`]:
//!    - Skips configured paths (`/livez`, `prefix*`, ...)
//!    - Tries each configured [`Authenticator`] in order
//!    - Attaches the first resulting [`Identity`] to the request
//! 3. Handlers read the identity through [`Authenticated`],
//!    [`OptionalIdentity`] or [`IdentityExt`]
//!
//! ## Strategies
//!
//! - [`OidcAuthenticator`] - ID tokens from a discovered OIDC provider
//! - [`SpiffeAuthenticator`] - JWT-SVIDs checked against Workload API bundles
//! - [`SentryAuthenticator`] - Dapr Sentry JWTs checked against its JWKS
//!
//! ## Security
//!
//! - Rejections are a generic 401; details are logged, never returned
//! - JWKS caches keep last-known-good keys when a refresh fails
//! - Symmetric (HMAC) keys and algorithms are never accepted

use async_trait::async_trait;

use crate::error::AuthError;

pub mod claims;
pub mod extractor;
pub mod identity;
pub mod jwks;
pub mod middleware;
pub mod mode;
pub mod oidc;
pub mod sentry;
pub mod spiffe;
pub mod spiffe_id;

#[cfg(test)]
pub(crate) mod test_support;

pub use extractor::{Authenticated, OptionalIdentity};
pub use identity::{attach_identity, identity, is_authenticated, with_identity, Identity, IdentityExt};
pub use jwks::{JwksCache, JwksError};
pub use middleware::auth_middleware;
pub use mode::AuthMode;
pub use oidc::OidcAuthenticator;
pub use sentry::SentryAuthenticator;
pub use spiffe::{SpiffeAuthenticator, SvidError, SvidValidator, ValidatedSvid, WorkloadApiValidator};
pub use spiffe_id::SpiffeId;

/// A token verification strategy.
///
/// One instance is shared by every request, so implementations must be safe
/// to call concurrently.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the caller's identity.
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;

    /// Strategy tag used for logging and registration.
    fn mode(&self) -> AuthMode;

    /// Release long-lived resources at shutdown.
    async fn close(&self) {}
}
