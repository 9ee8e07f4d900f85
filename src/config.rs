// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Configuration
//!
//! [`AuthConfig`] is built once at process start and is read-only afterwards.
//! It can be assembled in code or loaded from the environment.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTH_ENABLED` | Require authentication (`true` to enable) | `false` |
//! | `AUTH_MODE` | `disabled`, `oidc`, `spiffe`, `hybrid`, `dapr-sentry` | `disabled` |
//! | `AUTH_SKIP_PATHS` | Comma-separated exempt paths (`prefix*` wildcards) | `/livez,/readyz,/startupz` |
//! | `OIDC_ENABLED` | Enable OIDC in hybrid mode | `false` |
//! | `OIDC_ISSUER_URL` | OIDC provider URL | Required for OIDC |
//! | `OIDC_CLIENT_ID` | Expected `aud` claim | Required for OIDC |
//! | `OIDC_ALLOWED_ALGORITHMS` | Comma-separated signature algorithms | `RS256,ES256` |
//! | `OIDC_SKIP_ISSUER_CHECK` | Skip issuer validation (development only) | `false` |
//! | `SPIFFE_ENABLED` | Enable SPIFFE in hybrid mode | `false` |
//! | `SPIFFE_TRUST_DOMAIN` | Accepted trust domain | Required for SPIFFE |
//! | `SPIFFE_SERVER_ID` | This server's SPIFFE ID (JWT-SVID audience) | Required for SPIFFE |
//! | `SPIFFE_ENDPOINT_SOCKET` | Workload API socket address | `SPIFFE_ENDPOINT_SOCKET` default |
//! | `SPIFFE_ALLOWED_CLIENTS` | Comma-separated allowed client SPIFFE IDs | any |
//! | `DAPR_SENTRY_ENABLED` | Enable Dapr Sentry in hybrid mode | `false` |
//! | `DAPR_SENTRY_JWKS_URL` | Sentry JWKS endpoint | Required for Dapr Sentry |
//! | `DAPR_SENTRY_TRUST_DOMAIN` | Trust domain expected in the `sub` SPIFFE ID | Required for Dapr Sentry |
//! | `DAPR_SENTRY_AUDIENCE` | Expected audience (unchecked when empty) | empty |
//! | `DAPR_SENTRY_TOKEN_HEADER` | Header carrying the raw token | `Authorization` |
//! | `DAPR_SENTRY_JWKS_REFRESH_INTERVAL` | JWKS refresh interval (`5m`, `30s`, ...) | `5m` |
//!
//! In a single-strategy mode the strategy's `*_ENABLED` flag is implied.
//! In hybrid mode the individual flags decide which strategies run.

use std::time::Duration;

use crate::auth::AuthMode;
use crate::error::AuthError;

pub const AUTH_ENABLED_ENV: &str = "AUTH_ENABLED";
pub const AUTH_MODE_ENV: &str = "AUTH_MODE";
pub const AUTH_SKIP_PATHS_ENV: &str = "AUTH_SKIP_PATHS";

pub const OIDC_ENABLED_ENV: &str = "OIDC_ENABLED";
pub const OIDC_ISSUER_URL_ENV: &str = "OIDC_ISSUER_URL";
pub const OIDC_CLIENT_ID_ENV: &str = "OIDC_CLIENT_ID";
pub const OIDC_ALLOWED_ALGORITHMS_ENV: &str = "OIDC_ALLOWED_ALGORITHMS";
pub const OIDC_SKIP_ISSUER_CHECK_ENV: &str = "OIDC_SKIP_ISSUER_CHECK";

pub const SPIFFE_ENABLED_ENV: &str = "SPIFFE_ENABLED";
pub const SPIFFE_TRUST_DOMAIN_ENV: &str = "SPIFFE_TRUST_DOMAIN";
pub const SPIFFE_SERVER_ID_ENV: &str = "SPIFFE_SERVER_ID";
pub const SPIFFE_ENDPOINT_SOCKET_ENV: &str = "SPIFFE_ENDPOINT_SOCKET";
pub const SPIFFE_ALLOWED_CLIENTS_ENV: &str = "SPIFFE_ALLOWED_CLIENTS";

pub const DAPR_SENTRY_ENABLED_ENV: &str = "DAPR_SENTRY_ENABLED";
pub const DAPR_SENTRY_JWKS_URL_ENV: &str = "DAPR_SENTRY_JWKS_URL";
pub const DAPR_SENTRY_TRUST_DOMAIN_ENV: &str = "DAPR_SENTRY_TRUST_DOMAIN";
pub const DAPR_SENTRY_AUDIENCE_ENV: &str = "DAPR_SENTRY_AUDIENCE";
pub const DAPR_SENTRY_TOKEN_HEADER_ENV: &str = "DAPR_SENTRY_TOKEN_HEADER";
pub const DAPR_SENTRY_JWKS_REFRESH_INTERVAL_ENV: &str = "DAPR_SENTRY_JWKS_REFRESH_INTERVAL";

/// Name of the standard credential header.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Paths exempt from authentication when `AUTH_SKIP_PATHS` is unset.
pub const DEFAULT_SKIP_PATHS: [&str; 3] = ["/livez", "/readyz", "/startupz"];

/// Signature algorithms accepted for OIDC tokens when none are configured.
pub const DEFAULT_OIDC_ALGORITHMS: [&str; 2] = ["RS256", "ES256"];

/// Default Dapr Sentry JWKS refresh interval (5 minutes).
pub const DEFAULT_JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Top-level authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Whether authentication is required at all
    pub enabled: bool,
    /// Active mode
    pub mode: AuthMode,
    /// Exempt path patterns (exact, or `prefix*`)
    pub skip_paths: Vec<String>,
    /// OIDC settings
    pub oidc: OidcConfig,
    /// SPIFFE settings
    pub spiffe: SpiffeConfig,
    /// Dapr Sentry settings
    pub sentry: SentryConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AuthMode::Disabled,
            skip_paths: DEFAULT_SKIP_PATHS.iter().map(|p| p.to_string()).collect(),
            oidc: OidcConfig::default(),
            spiffe: SpiffeConfig::default(),
            sentry: SentryConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Enabled configuration for a single mode, with default skip paths.
    pub fn for_mode(mode: AuthMode) -> Self {
        Self {
            enabled: true,
            mode,
            ..Self::default()
        }
    }

    /// Set the OIDC settings.
    pub fn with_oidc(mut self, oidc: OidcConfig) -> Self {
        self.oidc = oidc;
        self
    }

    /// Set the SPIFFE settings.
    pub fn with_spiffe(mut self, spiffe: SpiffeConfig) -> Self {
        self.spiffe = spiffe;
        self
    }

    /// Set the Dapr Sentry settings.
    pub fn with_sentry(mut self, sentry: SentryConfig) -> Self {
        self.sentry = sentry;
        self
    }

    /// Replace the exempt path patterns.
    pub fn with_skip_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Whether requests must be authenticated.
    pub fn requires_auth(&self) -> bool {
        self.enabled && self.mode != AuthMode::Disabled
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, AuthError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Fails only when `AUTH_MODE` names an unknown mode.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).unwrap_or_default();
        let flag = |key: &str| var(key) == "true";

        let mode = match lookup(AUTH_MODE_ENV).filter(|m| !m.trim().is_empty()) {
            Some(raw) => raw.parse::<AuthMode>()?,
            None => AuthMode::Disabled,
        };

        let skip_paths = match lookup(AUTH_SKIP_PATHS_ENV).filter(|p| !p.is_empty()) {
            Some(raw) => split_list(&raw),
            None => DEFAULT_SKIP_PATHS.iter().map(|p| p.to_string()).collect(),
        };

        let allowed_algorithms = match lookup(OIDC_ALLOWED_ALGORITHMS_ENV).filter(|a| !a.is_empty())
        {
            Some(raw) => split_list(&raw),
            None => DEFAULT_OIDC_ALGORITHMS.iter().map(|a| a.to_string()).collect(),
        };

        let mut oidc = OidcConfig {
            enabled: flag(OIDC_ENABLED_ENV),
            issuer_url: var(OIDC_ISSUER_URL_ENV),
            client_id: var(OIDC_CLIENT_ID_ENV),
            allowed_algorithms,
            skip_issuer_check: flag(OIDC_SKIP_ISSUER_CHECK_ENV),
        };

        let mut spiffe = SpiffeConfig {
            enabled: flag(SPIFFE_ENABLED_ENV),
            trust_domain: var(SPIFFE_TRUST_DOMAIN_ENV),
            server_id: var(SPIFFE_SERVER_ID_ENV),
            endpoint_socket: lookup(SPIFFE_ENDPOINT_SOCKET_ENV).filter(|s| !s.is_empty()),
            allowed_clients: lookup(SPIFFE_ALLOWED_CLIENTS_ENV)
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
        };

        let refresh_interval = lookup(DAPR_SENTRY_JWKS_REFRESH_INTERVAL_ENV)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| match humantime::parse_duration(raw.trim()) {
                Ok(interval) => Some(interval),
                Err(e) => {
                    tracing::warn!(
                        value = %raw,
                        error = %e,
                        "Invalid JWKS refresh interval, using default"
                    );
                    None
                }
            })
            .unwrap_or(DEFAULT_JWKS_REFRESH_INTERVAL);

        let mut sentry = SentryConfig {
            enabled: flag(DAPR_SENTRY_ENABLED_ENV),
            jwks_url: var(DAPR_SENTRY_JWKS_URL_ENV),
            trust_domain: var(DAPR_SENTRY_TRUST_DOMAIN_ENV),
            audience: var(DAPR_SENTRY_AUDIENCE_ENV),
            token_header: lookup(DAPR_SENTRY_TOKEN_HEADER_ENV)
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| AUTHORIZATION_HEADER.to_string()),
            refresh_interval,
        };

        match mode {
            AuthMode::Oidc => oidc.enabled = true,
            AuthMode::Spiffe => spiffe.enabled = true,
            AuthMode::DaprSentry => sentry.enabled = true,
            AuthMode::Hybrid | AuthMode::Disabled => {}
        }

        Ok(Self {
            enabled: flag(AUTH_ENABLED_ENV),
            mode,
            skip_paths,
            oidc,
            spiffe,
            sentry,
        })
    }

    /// Validate internal consistency.
    ///
    /// A disabled configuration is always valid. A single-strategy mode needs
    /// that strategy enabled and complete; hybrid needs at least one enabled
    /// strategy and every enabled one complete.
    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }

        match self.mode {
            AuthMode::Disabled => Ok(()),
            AuthMode::Oidc => {
                require_enabled(self.oidc.enabled, self.mode)?;
                self.oidc.validate()
            }
            AuthMode::Spiffe => {
                require_enabled(self.spiffe.enabled, self.mode)?;
                self.spiffe.validate()
            }
            AuthMode::DaprSentry => {
                require_enabled(self.sentry.enabled, self.mode)?;
                self.sentry.validate()
            }
            AuthMode::Hybrid => {
                if !self.oidc.enabled && !self.spiffe.enabled && !self.sentry.enabled {
                    return Err(AuthError::UnsupportedMethod(
                        "hybrid mode requires at least one enabled method".to_string(),
                    ));
                }
                self.oidc.validate()?;
                self.spiffe.validate()?;
                self.sentry.validate()
            }
        }
    }
}

fn require_enabled(enabled: bool, mode: AuthMode) -> Result<(), AuthError> {
    if enabled {
        Ok(())
    } else {
        Err(AuthError::UnsupportedMethod(format!(
            "mode {mode} selected but not enabled"
        )))
    }
}

fn require_field(value: &str, name: &'static str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        Err(AuthError::MissingField(name))
    } else {
        Ok(())
    }
}

fn require_http_url(value: &str, name: &'static str) -> Result<(), AuthError> {
    let url = url::Url::parse(value.trim())
        .map_err(|e| AuthError::InvalidConfig(format!("{name} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(AuthError::InvalidConfig(format!(
            "{name} must use http or https, got {scheme}"
        ))),
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// OIDC settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    /// Whether OIDC authentication runs
    pub enabled: bool,
    /// Provider URL; discovery is performed against it
    pub issuer_url: String,
    /// Expected `aud` claim
    pub client_id: String,
    /// Accepted signature algorithm names
    pub allowed_algorithms: Vec<String>,
    /// Skip issuer validation (development only)
    pub skip_issuer_check: bool,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: String::new(),
            client_id: String::new(),
            allowed_algorithms: DEFAULT_OIDC_ALGORITHMS.iter().map(|a| a.to_string()).collect(),
            skip_issuer_check: false,
        }
    }
}

impl OidcConfig {
    /// Enabled OIDC settings for an issuer and client ID.
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Replace the accepted signature algorithms.
    pub fn with_allowed_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Skip issuer validation.
    pub fn with_skip_issuer_check(mut self, skip: bool) -> Self {
        self.skip_issuer_check = skip;
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }
        require_field(&self.issuer_url, OIDC_ISSUER_URL_ENV)?;
        require_field(&self.client_id, OIDC_CLIENT_ID_ENV)?;
        require_http_url(&self.issuer_url, OIDC_ISSUER_URL_ENV)
    }
}

/// SPIFFE settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpiffeConfig {
    /// Whether SPIFFE authentication runs
    pub enabled: bool,
    /// Accepted trust domain
    pub trust_domain: String,
    /// This server's SPIFFE ID, used as the expected audience
    pub server_id: String,
    /// Workload API address; `None` uses `SPIFFE_ENDPOINT_SOCKET`
    pub endpoint_socket: Option<String>,
    /// Allowed client SPIFFE IDs; empty allows any trust-domain member
    pub allowed_clients: Vec<String>,
}

impl SpiffeConfig {
    /// Enabled SPIFFE settings for a trust domain and server ID.
    pub fn new(trust_domain: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            trust_domain: trust_domain.into(),
            server_id: server_id.into(),
            ..Self::default()
        }
    }

    /// Use a non-default Workload API address.
    pub fn with_endpoint_socket(mut self, socket: impl Into<String>) -> Self {
        self.endpoint_socket = Some(socket.into());
        self
    }

    /// Restrict callers to the given SPIFFE IDs.
    pub fn with_allowed_clients<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_clients = clients.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }
        require_field(&self.trust_domain, SPIFFE_TRUST_DOMAIN_ENV)?;
        require_field(&self.server_id, SPIFFE_SERVER_ID_ENV)
    }
}

/// Dapr Sentry (control-plane JWT) settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentryConfig {
    /// Whether Dapr Sentry authentication runs
    pub enabled: bool,
    /// JWKS endpoint
    pub jwks_url: String,
    /// Trust domain expected in the `sub` SPIFFE ID
    pub trust_domain: String,
    /// Expected audience; empty disables the audience check
    pub audience: String,
    /// Header carrying the raw token
    pub token_header: String,
    /// Maximum JWKS cache age before a refresh is attempted
    pub refresh_interval: Duration,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jwks_url: String::new(),
            trust_domain: String::new(),
            audience: String::new(),
            token_header: AUTHORIZATION_HEADER.to_string(),
            refresh_interval: DEFAULT_JWKS_REFRESH_INTERVAL,
        }
    }
}

impl SentryConfig {
    /// Enabled Dapr Sentry settings for a JWKS URL and trust domain.
    pub fn new(jwks_url: impl Into<String>, trust_domain: impl Into<String>) -> Self {
        Self {
            enabled: true,
            jwks_url: jwks_url.into(),
            trust_domain: trust_domain.into(),
            ..Self::default()
        }
    }

    /// Require an audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Read the token from a custom header.
    pub fn with_token_header(mut self, header: impl Into<String>) -> Self {
        self.token_header = header.into();
        self
    }

    /// Set the JWKS refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Custom token header, if one other than `Authorization` is configured.
    pub fn custom_token_header(&self) -> Option<&str> {
        let header = self.token_header.trim();
        if header.is_empty() || header.eq_ignore_ascii_case(AUTHORIZATION_HEADER) {
            None
        } else {
            Some(header)
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }
        require_field(&self.jwks_url, DAPR_SENTRY_JWKS_URL_ENV)?;
        require_field(&self.trust_domain, DAPR_SENTRY_TRUST_DOMAIN_ENV)?;
        require_http_url(&self.jwks_url, DAPR_SENTRY_JWKS_URL_ENV)
    }
}
