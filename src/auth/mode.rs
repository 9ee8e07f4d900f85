// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Authentication mode.
///
/// Used both to select the active authenticator set and to tag which
/// strategy produced an [`Identity`](super::Identity).
///
/// ## Modes
///
/// - `Disabled` - No authentication (local development)
/// - `Oidc` - OAuth2.0 / OpenID Connect ID tokens
/// - `Spiffe` - SPIFFE JWT-SVIDs validated against the Workload API bundle
/// - `Hybrid` - Every enabled strategy, tried in order
/// - `DaprSentry` - JWTs issued by the Dapr Sentry control plane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Authentication disabled
    #[default]
    Disabled,
    /// OIDC ID tokens
    Oidc,
    /// SPIFFE JWT-SVIDs
    Spiffe,
    /// Any enabled strategy
    Hybrid,
    /// Dapr Sentry control-plane JWTs
    DaprSentry,
}

impl AuthMode {
    /// Canonical lowercase name, as accepted by `AUTH_MODE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Disabled => "disabled",
            AuthMode::Oidc => "oidc",
            AuthMode::Spiffe => "spiffe",
            AuthMode::Hybrid => "hybrid",
            AuthMode::DaprSentry => "dapr-sentry",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = AuthError;

    /// Parse a mode (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" => Ok(AuthMode::Disabled),
            "oidc" => Ok(AuthMode::Oidc),
            "spiffe" => Ok(AuthMode::Spiffe),
            "hybrid" => Ok(AuthMode::Hybrid),
            "dapr-sentry" => Ok(AuthMode::DaprSentry),
            other => Err(AuthError::UnsupportedMethod(other.to_string())),
        }
    }
}
