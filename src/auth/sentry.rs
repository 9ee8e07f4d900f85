// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Dapr Sentry (control-plane) JWT authentication.
//!
//! Sentry tokens carry the caller's SPIFFE ID in `sub` and have no usable
//! `iss`, so trust is scoped by the subject's trust domain instead of the
//! issuer. Signing keys come from Sentry's JWKS endpoint.
//!
//! ## Verification order
//!
//! 1. Parse the header (unverified)
//! 2. Resolve candidate keys by `kid`
//! 3. Verify the signature
//! 4. `exp` (no leeway)
//! 5. `nbf` (no leeway)
//! 6. Audience, only when one is configured
//! 7. Non-empty `sub`
//! 8. `sub` is a SPIFFE ID in the configured trust domain

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::Value;

use super::claims::{contains_audience, SentryClaims};
use super::jwks::{JwksCache, DEFAULT_FETCH_TIMEOUT};
use super::spiffe_id::is_valid_spiffe_id;
use super::{AuthMode, Authenticator, Identity};
use crate::config::SentryConfig;
use crate::error::AuthError;

/// Upper bound on the JWKS fetch performed at construction.
pub const INITIAL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticator for Dapr Sentry issued JWTs.
pub struct SentryAuthenticator {
    config: SentryConfig,
    jwks: JwksCache,
}

impl SentryAuthenticator {
    /// Create the authenticator and load the initial key set.
    ///
    /// Fails if the JWKS cannot be fetched within [`INITIAL_FETCH_TIMEOUT`].
    pub async fn new(config: SentryConfig) -> Result<Self, AuthError> {
        let jwks = JwksCache::new(
            config.jwks_url.clone(),
            config.refresh_interval,
            DEFAULT_FETCH_TIMEOUT,
        )
        .map_err(|e| AuthError::Initialization(e.to_string()))?;

        let key_count = tokio::time::timeout(INITIAL_FETCH_TIMEOUT, jwks.refresh())
            .await
            .map_err(|_| {
                AuthError::Initialization("timed out fetching initial Sentry JWKS".to_string())
            })?
            .map_err(|e| {
                AuthError::Initialization(format!("failed to fetch initial Sentry JWKS: {e}"))
            })?;

        tracing::info!(
            jwks_url = %config.jwks_url,
            trust_domain = %config.trust_domain,
            audience = %config.audience,
            key_count,
            "Dapr Sentry authenticator initialized"
        );

        Ok(Self { config, jwks })
    }

    /// Verify the signature and decode claims. Time and subject checks are
    /// done by the caller so that each failure maps to its own error.
    async fn verify_signature(&self, token: &str) -> Result<SentryClaims, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("failed to parse token: {e}")))?;

        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header.kid.as_deref().unwrap_or_default();
        let keys = self
            .jwks
            .resolve(kid)
            .await
            .map_err(|e| AuthError::InvalidToken(format!("failed to get signing key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let mut last_error = None;
        for key in keys.iter().filter(|k| k.algorithms.contains(&header.alg)) {
            match decode::<SentryClaims>(token, &key.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => AuthError::InvalidToken(format!("failed to verify token: {e}")),
            None => AuthError::InvalidToken(format!(
                "no signing key for algorithm {:?}",
                header.alg
            )),
        })
    }

    fn check_claims(&self, claims: &SentryClaims) -> Result<(), AuthError> {
        let now = chrono::Utc::now();

        if claims.expires_at().is_some_and(|exp| now > exp) {
            return Err(AuthError::TokenExpired);
        }

        if claims.not_before().is_some_and(|nbf| now < nbf) {
            return Err(AuthError::InvalidToken("token not yet valid".to_string()));
        }

        if !self.config.audience.is_empty()
            && !contains_audience(&claims.aud, &self.config.audience)
        {
            return Err(AuthError::InvalidAudience(format!(
                "expected {}, got {:?}",
                self.config.audience, claims.aud
            )));
        }

        let subject = claims.sub.as_deref().unwrap_or_default();
        if subject.is_empty() {
            return Err(AuthError::InvalidToken("missing subject".to_string()));
        }

        if !is_valid_spiffe_id(subject, &self.config.trust_domain) {
            return Err(AuthError::InvalidToken(format!(
                "invalid trust domain in subject {subject}, expected {}",
                self.config.trust_domain
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Authenticator for SentryAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.verify_signature(token).await?;
        self.check_claims(&claims)?;

        tracing::debug!(
            subject = ?claims.sub,
            issuer = ?claims.iss,
            "Dapr Sentry token verified"
        );

        let mut extra = HashMap::new();
        if let Some(jti) = &claims.jti {
            extra.insert("jti".to_string(), Value::from(jti.clone()));
        }
        if let Some(key_use) = &claims.key_use {
            extra.insert("use".to_string(), Value::from(key_use.clone()));
        }
        if let Some(iat) = claims.iat {
            extra.insert("iat".to_string(), Value::from(iat));
        }
        if let Some(exp) = claims.exp {
            extra.insert("exp".to_string(), Value::from(exp));
        }

        let SentryClaims { sub, aud, .. } = claims;
        Ok(Identity::new(sub.unwrap_or_default(), AuthMode::DaprSentry)
            .with_audience(aud)
            .with_claims(extra))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::DaprSentry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{now, TestServer, KEY_ONE, KEY_TWO};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SUBJECT: &str = "spiffe://public/ns/default/test-uuid";

    async fn setup(audience: &str) -> (TestServer, SentryAuthenticator) {
        let server = TestServer::start(vec![KEY_ONE.jwk("k1")]).await;
        let config = SentryConfig::new(server.jwks_url(), "public").with_audience(audience);
        let auth = SentryAuthenticator::new(config).await.unwrap();
        (server, auth)
    }

    fn claims(overrides: Value) -> Value {
        let mut base = json!({
            "sub": SUBJECT,
            "aud": ["public"],
            "iat": now(),
            "exp": now() + 300,
            "jti": "token-1",
            "use": "sig"
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                if v.is_null() {
                    base.remove(k);
                } else {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
        base
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({})));

        let identity = auth.authenticate(&token).await.unwrap();
        assert_eq!(identity.subject, SUBJECT);
        assert_eq!(identity.auth_method, AuthMode::DaprSentry);
        assert_eq!(identity.audience, vec!["public"]);
        assert_eq!(identity.claim("jti"), Some(&json!("token-1")));
        assert_eq!(identity.claim("use"), Some(&json!("sig")));
        assert!(identity.claim("iat").unwrap().is_i64());
        assert!(identity.claim("exp").unwrap().is_i64());
        assert!(identity.issuer.is_empty());
        assert_eq!(auth.mode(), AuthMode::DaprSentry);
    }

    #[tokio::test]
    async fn authentication_is_deterministic() {
        let (server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({})));

        let first = auth.authenticate(&token).await.unwrap();
        let second = auth.authenticate(&token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.jwks_hits(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_distinct_error() {
        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({ "exp": now() - 10 })));

        assert_eq!(auth.authenticate(&token).await, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn expiry_earlier_this_second_is_expired() {
        let (_server, auth) = setup("public").await;

        // Move well into the current second so `exp` is strictly in the past.
        let millis = chrono::Utc::now().timestamp_subsec_millis();
        if millis < 500 {
            tokio::time::sleep(std::time::Duration::from_millis(u64::from(600 - millis))).await;
        }
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({ "exp": now() })));

        assert_eq!(auth.authenticate(&token).await, Err(AuthError::TokenExpired));
    }

    #[tokio::test]
    async fn future_nbf_is_not_yet_valid() {
        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({ "nbf": now() + 600 })));

        let err = auth.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("not yet valid")));
    }

    #[tokio::test]
    async fn audience_mismatch_rejected() {
        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({ "aud": ["other"] })));

        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::InvalidAudience(_))
        ));
    }

    #[tokio::test]
    async fn audience_not_enforced_when_unconfigured() {
        let (_server, auth) = setup("").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({ "aud": "anything" })));

        let identity = auth.authenticate(&token).await.unwrap();
        assert_eq!(identity.audience, vec!["anything"]);
    }

    #[tokio::test]
    async fn wrong_trust_domain_rejected() {
        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(
            Some("k1"),
            &claims(json!({ "sub": "spiffe://wrong-domain/ns/default/app" })),
        );

        let err = auth.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("invalid trust domain")));
    }

    #[tokio::test]
    async fn subject_must_be_present_and_spiffe() {
        let (_server, auth) = setup("public").await;

        let missing = KEY_ONE.sign(Some("k1"), &claims(json!({ "sub": null })));
        let err = auth.authenticate(&missing).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("missing subject".to_string()));

        let empty = KEY_ONE.sign(Some("k1"), &claims(json!({ "sub": "" })));
        assert!(auth.authenticate(&empty).await.is_err());

        let not_spiffe = KEY_ONE.sign(Some("k1"), &claims(json!({ "sub": "user-123" })));
        let err = auth.authenticate(&not_spiffe).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("invalid trust domain")));
    }

    #[tokio::test]
    async fn unregistered_signing_key_fails_verification() {
        let (_server, auth) = setup("public").await;
        // Claims kid k1 but signed with a different private key.
        let token = KEY_TWO.sign(Some("k1"), &claims(json!({})));

        let err = auth.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("failed to verify")));
    }

    #[tokio::test]
    async fn tampered_payload_fails_verification() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let (_server, auth) = setup("public").await;
        let token = KEY_ONE.sign(Some("k1"), &claims(json!({})));
        let parts: Vec<&str> = token.split('.').collect();

        let mut payload: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        payload["sub"] = json!("spiffe://public/ns/default/admin");
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap()),
            parts[2]
        );

        assert!(matches!(
            auth.authenticate(&forged).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn unknown_kid_fails_after_refresh() {
        let (server, auth) = setup("public").await;
        let token = KEY_TWO.sign(Some("k2"), &claims(json!({})));

        let err = auth.authenticate(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("signing key")));
        assert_eq!(server.jwks_hits(), 2);
    }

    #[tokio::test]
    async fn rotated_key_picked_up_on_miss() {
        let (server, auth) = setup("public").await;
        server.set_keys(vec![KEY_ONE.jwk("k1"), KEY_TWO.jwk("k2")]);

        let token = KEY_TWO.sign(Some("k2"), &claims(json!({})));
        let identity = auth.authenticate(&token).await.unwrap();
        assert_eq!(identity.subject, SUBJECT);
    }

    #[tokio::test]
    async fn token_without_kid_tries_every_key() {
        let (server, auth) = setup("public").await;
        server.set_keys(vec![KEY_ONE.jwk("k1"), KEY_TWO.jwk("k2")]);
        auth.jwks.refresh().await.unwrap();

        let token = KEY_TWO.sign(None, &claims(json!({})));
        assert!(auth.authenticate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn symmetric_and_garbage_tokens_rejected() {
        let (_server, auth) = setup("public").await;

        let hmac = encode(
            &Header::new(Algorithm::HS256),
            &claims(json!({})),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(matches!(
            auth.authenticate(&hmac).await,
            Err(AuthError::InvalidToken(_))
        ));

        assert!(matches!(
            auth.authenticate("not-a-jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn initial_fetch_failure_is_fatal() {
        let server = TestServer::start(vec![]).await;
        server.set_failing(true);
        let config = SentryConfig::new(server.jwks_url(), "public");

        let err = SentryAuthenticator::new(config).await.err().unwrap();
        assert!(matches!(err, AuthError::Initialization(ref msg) if msg.contains("initial Sentry JWKS")));
    }
}
