// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authenticated identity.
//!
//! The extractors only read what [`auth_middleware`](super::auth_middleware)
//! attached; they never verify tokens themselves.
//!
//! ```rust,ignore
//! async fn whoami(Authenticated(identity): Authenticated) -> String {
//!     identity.subject.clone()
//! }
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use super::identity::identity;
use super::Identity;
use crate::error::AuthError;

/// Extractor requiring an authenticated identity.
///
/// Rejects with `401 Unauthorized: no token provided` when the request did
/// not pass through the middleware (for example a skipped path).
#[derive(Debug, Clone)]
pub struct Authenticated(pub Arc<Identity>);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity(&parts.extensions)
            .map(Authenticated)
            .ok_or(AuthError::NoToken)
    }
}

/// Allows `Option<Authenticated>` in handler signatures.
impl<S> OptionalFromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(identity(&parts.extensions).map(Authenticated))
    }
}

/// Extractor for an identity that may be absent.
#[derive(Debug, Clone, Default)]
pub struct OptionalIdentity(pub Option<Arc<Identity>>);

impl<S> FromRequestParts<S> for OptionalIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalIdentity(identity(&parts.extensions)))
    }
}
