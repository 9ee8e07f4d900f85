// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared middleware state: the configuration and the ordered authenticators.

use std::sync::Arc;

use crate::auth::{
    AuthMode, Authenticator, OidcAuthenticator, SentryAuthenticator, SpiffeAuthenticator,
};
use crate::config::AuthConfig;
use crate::error::AuthError;

/// State handed to [`auth_middleware`](crate::auth::auth_middleware).
///
/// Cheap to clone; every clone shares the same authenticator instances.
#[derive(Clone)]
pub struct AuthState {
    inner: Arc<Inner>,
}

struct Inner {
    config: AuthConfig,
    authenticators: Vec<Arc<dyn Authenticator>>,
    token_header: Option<String>,
}

impl AuthState {
    /// Create state from a pre-built authenticator list, tried in order.
    pub fn new(config: AuthConfig, authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        let sentry_active = authenticators
            .iter()
            .any(|a| a.mode() == AuthMode::DaprSentry);
        let token_header = sentry_active
            .then(|| config.sentry.custom_token_header().map(str::to_string))
            .flatten();

        Self {
            inner: Arc::new(Inner {
                config,
                authenticators,
                token_header,
            }),
        }
    }

    /// Validate `config` and construct the authenticators its mode selects,
    /// in the order OIDC, SPIFFE, Dapr Sentry.
    pub async fn from_config(config: AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;

        if !config.requires_auth() {
            tracing::warn!("Authentication disabled - all requests pass through");
            return Ok(Self::new(config, Vec::new()));
        }

        let mode = config.mode;
        let selected = |strategy: AuthMode, enabled: bool| {
            mode == strategy || (mode == AuthMode::Hybrid && enabled)
        };

        let mut authenticators: Vec<Arc<dyn Authenticator>> = Vec::new();

        if selected(AuthMode::Oidc, config.oidc.enabled) {
            let oidc = OidcAuthenticator::new(config.oidc.clone())
                .await
                .inspect_err(|e| {
                    tracing::error!(error = %e, "Failed to create OIDC authenticator")
                })?;
            authenticators.push(Arc::new(oidc));
        }

        if selected(AuthMode::Spiffe, config.spiffe.enabled) {
            let spiffe = SpiffeAuthenticator::new(config.spiffe.clone())
                .await
                .inspect_err(|e| {
                    tracing::error!(error = %e, "Failed to create SPIFFE authenticator")
                })?;
            authenticators.push(Arc::new(spiffe));
        }

        if selected(AuthMode::DaprSentry, config.sentry.enabled) {
            let sentry = SentryAuthenticator::new(config.sentry.clone())
                .await
                .inspect_err(|e| {
                    tracing::error!(error = %e, "Failed to create Dapr Sentry authenticator")
                })?;
            authenticators.push(Arc::new(sentry));
        }

        tracing::info!(
            mode = %mode,
            authenticators = authenticators.len(),
            skip_paths = ?config.skip_paths,
            "Authentication configured"
        );

        Ok(Self::new(config, authenticators))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    /// Authenticators in trial order.
    pub fn authenticators(&self) -> &[Arc<dyn Authenticator>] {
        &self.inner.authenticators
    }

    /// Custom header read before `Authorization`, when a Dapr Sentry
    /// authenticator is active and configured with one.
    pub fn token_header(&self) -> Option<&str> {
        self.inner.token_header.as_deref()
    }

    /// Release long-lived authenticator resources (the SPIFFE Workload API
    /// connection).
    pub async fn shutdown(&self) {
        for authenticator in &self.inner.authenticators {
            authenticator.close().await;
        }
    }
}
