// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! ```rust,ignore
//! let state = AuthState::from_config(AuthConfig::from_env()?).await?;
//! let app = Router::new()
//!     .route("/tools", post(call_tool))
//!     .layer(axum::middleware::from_fn_with_state(state, auth_middleware));
//! ```
//!
//! ## Request flow
//!
//! 1. Skip-path match: pass through untouched
//! 2. Authentication not required: pass through untouched
//! 3. No token found: `401 Unauthorized: no token provided`
//! 4. Authenticators tried in order; first success is attached to the request
//! 5. All failed: `401 Unauthorized: invalid token`

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::identity::attach_identity;
use super::{Authenticator, Identity};
use crate::error::AuthError;
use crate::state::AuthState;

const BEARER_PREFIX: &str = "bearer ";

/// Number of leading token characters that may appear in logs.
const SAFE_PREFIX_LEN: usize = 20;

/// Where a token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// Configured custom header, taken verbatim
    CustomHeader,
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: <token>`
    Raw,
}

/// Authentication middleware function.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if should_skip(&state.config().skip_paths, path) {
        tracing::trace!(path, "Skipping authentication");
        return next.run(request).await;
    }

    if !state.config().requires_auth() {
        return next.run(request).await;
    }

    let Some((token, source)) = extract_token(request.headers(), state.token_header()) else {
        tracing::debug!(path, "No authentication token provided");
        return AuthError::NoToken.into_response();
    };

    tracing::debug!(
        path,
        source = ?source,
        token_len = token.len(),
        token_prefix = %safe_token_prefix(&token),
        "Authenticating request"
    );

    match authenticate_token(state.authenticators(), &token).await {
        Ok(identity) => {
            tracing::debug!(
                path,
                subject = %identity.subject,
                method = %identity.auth_method,
                "Request authenticated"
            );
            attach_identity(request.extensions_mut(), identity);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(path, error = %e, code = e.error_code(), "Authentication failed");
            // Only the generic two-case body ever reaches the caller.
            if e.is_unauthorized() {
                e.into_response()
            } else {
                AuthError::InvalidToken(e.to_string()).into_response()
            }
        }
    }
}

/// Try each authenticator in order; the first success wins.
///
/// On total failure the last error is returned. An empty list fails with
/// `InvalidToken`.
pub async fn authenticate_token(
    authenticators: &[Arc<dyn Authenticator>],
    token: &str,
) -> Result<Identity, AuthError> {
    let mut last_error = AuthError::InvalidToken("no authenticators configured".to_string());

    for authenticator in authenticators {
        match authenticator.authenticate(token).await {
            Ok(identity) => return Ok(identity),
            Err(e) => {
                tracing::debug!(
                    method = %authenticator.mode(),
                    code = e.error_code(),
                    error = %e,
                    "Authenticator rejected token"
                );
                last_error = e;
            }
        }
    }

    Err(last_error)
}

/// Whether `path` is exempt from authentication.
///
/// A pattern matches exactly, or as a prefix when it ends in `*`.
pub fn should_skip(skip_paths: &[String], path: &str) -> bool {
    skip_paths.iter().any(|pattern| match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => path == pattern,
    })
}

/// Find the request's token.
///
/// A non-empty `custom_header` value wins and is used verbatim. Otherwise
/// `Authorization` is read: a case-insensitive `Bearer ` scheme is stripped
/// (plus one extra leading space), anything else is taken as a raw token.
/// Non-ASCII header bytes are decoded lossily, so such a value still counts
/// as a token and fails verification.
pub fn extract_token(
    headers: &HeaderMap,
    custom_header: Option<&str>,
) -> Option<(String, TokenSource)> {
    if let Some(name) = custom_header {
        if let Some(value) = header_str(headers, name).filter(|v| !v.is_empty()) {
            return Some((value.into_owned(), TokenSource::CustomHeader));
        }
    }

    let value = header_str(headers, AUTHORIZATION.as_str())?;
    let value: &str = &value;

    let (token, source) = match value.get(..BEARER_PREFIX.len()) {
        Some(scheme) if scheme.eq_ignore_ascii_case(BEARER_PREFIX) => {
            let rest = &value[BEARER_PREFIX.len()..];
            (rest.strip_prefix(' ').unwrap_or(rest), TokenSource::Bearer)
        }
        _ => (value, TokenSource::Raw),
    };

    if token.is_empty() {
        None
    } else {
        Some((token.to_string(), source))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<Cow<'a, str>> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()))
}

/// Loggable token prefix; never the whole token.
pub fn safe_token_prefix(token: &str) -> String {
    match token.char_indices().nth(SAFE_PREFIX_LEN) {
        Some((end, _)) => format!("{}...", &token[..end]),
        None => "[redacted]".to_string(),
    }
}
