// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Relational Auth Gateway - Pluggable Authentication Middleware
//!
//! This crate gates inbound HTTP requests with one of several interchangeable
//! trust mechanisms and hands the verified caller identity to handlers.
//!
//! ## Modules
//!
//! - `auth` - Authenticators (OIDC, SPIFFE, Dapr Sentry), middleware, extractors
//! - `config` - Authentication configuration and validation
//! - `error` - Authentication errors and their HTTP mapping
//! - `state` - Shared middleware state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relational_auth_gateway::{auth_middleware, AuthConfig, AuthState};
//!
//! let state = AuthState::from_config(AuthConfig::from_env()?).await?;
//! let app = Router::new()
//!     .route("/tools", post(call_tool))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));
//! // ...
//! state.shutdown().await;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod state;

pub use auth::{auth_middleware, AuthMode, Authenticated, Authenticator, Identity, IdentityExt};
pub use config::AuthConfig;
pub use error::AuthError;
pub use state::AuthState;
