// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verified caller identity and its request-scoped carrier.
//!
//! The identity lives in the request's [`Extensions`] under a private key
//! type, so only the middleware (or code calling [`attach_identity`]) can
//! mark a request as authenticated.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{request::Parts, Extensions, Request};
use serde::{Deserialize, Serialize};

use super::AuthMode;

/// Authenticated caller, created once per successful authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// User ID (OIDC) or SPIFFE ID (SPIFFE / Dapr Sentry). Never empty.
    pub subject: String,

    /// Token issuer or trust domain; empty when not applicable
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,

    /// Intended recipients of the token
    #[serde(default)]
    pub audience: Vec<String>,

    /// Email address (OIDC only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name (OIDC only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Claims the verifying strategy chose to surface
    #[serde(default)]
    pub claims: HashMap<String, serde_json::Value>,

    /// Strategy that produced this identity
    pub auth_method: AuthMode,
}

impl Identity {
    /// Create an identity with only a subject and method.
    pub fn new(subject: impl Into<String>, auth_method: AuthMode) -> Self {
        Self {
            subject: subject.into(),
            issuer: String::new(),
            audience: Vec::new(),
            email: None,
            name: None,
            claims: HashMap::new(),
            auth_method,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_claims(mut self, claims: HashMap<String, serde_json::Value>) -> Self {
        self.claims = claims;
        self
    }

    /// Look up a surfaced claim.
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}

/// Extension key. Private so callers cannot forge an authenticated request.
#[derive(Clone)]
struct VerifiedIdentity(Arc<Identity>);

/// Attach an identity to a request's extensions. Replaces any previous one.
pub fn attach_identity(extensions: &mut Extensions, identity: Identity) -> Arc<Identity> {
    let identity = Arc::new(identity);
    extensions.insert(VerifiedIdentity(Arc::clone(&identity)));
    identity
}

/// Return the request with `identity` attached.
pub fn with_identity<B>(mut request: Request<B>, identity: Identity) -> Request<B> {
    attach_identity(request.extensions_mut(), identity);
    request
}

/// Retrieve the attached identity, if any.
pub fn identity(extensions: &Extensions) -> Option<Arc<Identity>> {
    extensions.get::<VerifiedIdentity>().map(|v| Arc::clone(&v.0))
}

/// True iff an identity is attached.
pub fn is_authenticated(extensions: &Extensions) -> bool {
    extensions.get::<VerifiedIdentity>().is_some()
}

/// Identity accessors for request types.
pub trait IdentityExt {
    /// The authenticated identity, if the request passed authentication.
    fn identity(&self) -> Option<Arc<Identity>>;

    /// Whether the request carries an authenticated identity.
    fn is_authenticated(&self) -> bool {
        self.identity().is_some()
    }
}

impl IdentityExt for Extensions {
    fn identity(&self) -> Option<Arc<Identity>> {
        identity(self)
    }
}

impl<B> IdentityExt for Request<B> {
    fn identity(&self) -> Option<Arc<Identity>> {
        identity(self.extensions())
    }
}

impl IdentityExt for Parts {
    fn identity(&self) -> Option<Arc<Identity>> {
        identity(&self.extensions)
    }
}
