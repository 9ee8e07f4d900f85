// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Per-request failures all collapse into a generic `401` response. The
//! variant (and its detail) only ever reaches the logs, never the caller.

use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};

/// Body returned when no credential was found on the request.
pub const NO_TOKEN_BODY: &str = "Unauthorized: no token provided";

/// Body returned for every other authentication failure.
pub const INVALID_TOKEN_BODY: &str = "Unauthorized: invalid token";

/// Authentication error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential found in any accepted header
    #[error("no authentication token provided")]
    NoToken,

    /// Malformed, unverifiable or otherwise unacceptable token
    #[error("invalid authentication token: {0}")]
    InvalidToken(String),

    /// Token `exp` is in the past
    #[error("authentication token expired")]
    TokenExpired,

    /// SVID trust domain does not match the configured one
    #[error("invalid token issuer: {0}")]
    InvalidIssuer(String),

    /// Expected audience is missing from the token
    #[error("invalid token audience: {0}")]
    InvalidAudience(String),

    /// Authentication is switched off
    #[error("authentication is disabled")]
    AuthDisabled,

    /// Mode has no matching enabled strategy, or is unknown
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// A required configuration field is empty
    #[error("{0} is required")]
    MissingField(&'static str),

    /// A configuration value is malformed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An authenticator could not be constructed
    #[error("authenticator initialization failed: {0}")]
    Initialization(String),
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NoToken => "no_token",
            AuthError::InvalidToken(_) => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidIssuer(_) => "invalid_issuer",
            AuthError::InvalidAudience(_) => "invalid_audience",
            AuthError::AuthDisabled => "auth_disabled",
            AuthError::UnsupportedMethod(_) => "unsupported_method",
            AuthError::MissingField(_) => "missing_field",
            AuthError::InvalidConfig(_) => "invalid_config",
            AuthError::Initialization(_) => "initialization_failed",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NoToken
            | AuthError::InvalidToken(_)
            | AuthError::TokenExpired
            | AuthError::InvalidIssuer(_)
            | AuthError::InvalidAudience(_) => StatusCode::UNAUTHORIZED,
            AuthError::AuthDisabled
            | AuthError::UnsupportedMethod(_)
            | AuthError::MissingField(_)
            | AuthError::InvalidConfig(_)
            | AuthError::Initialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is a per-request authentication failure.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == StatusCode::UNAUTHORIZED
    }

    /// Caller-facing body. Never includes the internal detail.
    fn public_body(&self) -> &'static str {
        match self {
            AuthError::NoToken => NO_TOKEN_BODY,
            _ if self.is_unauthorized() => INVALID_TOKEN_BODY,
            _ => "Internal Server Error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_body(),
        )
            .into_response()
    }
}
