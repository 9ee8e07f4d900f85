// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenID Connect ID token authentication.
//!
//! The provider is discovered once at construction. Its `jwks_uri` backs a
//! [`JwksCache`], so signing key rotation is picked up by the cache's
//! refresh-on-miss rule.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use serde_json::Value;

use super::claims::audience_from_value;
use super::jwks::{JwksCache, DEFAULT_FETCH_TIMEOUT};
use super::{AuthMode, Authenticator, Identity};
use crate::config::{OidcConfig, DEFAULT_JWKS_REFRESH_INTERVAL, DEFAULT_OIDC_ALGORITHMS};
use crate::error::AuthError;

/// Clock skew tolerance in seconds for `exp` / `nbf`.
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Upper bound on provider discovery at construction.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Subset of the OpenID Provider metadata we rely on.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

/// Authenticator for OIDC ID tokens.
pub struct OidcAuthenticator {
    config: OidcConfig,
    algorithms: Vec<Algorithm>,
    jwks: JwksCache,
}

impl std::fmt::Debug for OidcAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcAuthenticator")
            .field("issuer_url", &self.config.issuer_url)
            .field("client_id", &self.config.client_id)
            .field("algorithms", &self.algorithms)
            .field("jwks_url", &self.jwks.jwks_url())
            .finish()
    }
}

impl OidcAuthenticator {
    /// Discover the provider and build the verifier.
    ///
    /// Fails on an unknown algorithm name, unreachable discovery endpoint, or
    /// (unless issuer checks are skipped) an issuer mismatch.
    pub async fn new(config: OidcConfig) -> Result<Self, AuthError> {
        let algorithms = parse_algorithms(&config.allowed_algorithms)?;

        let client = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Initialization(format!("failed to create HTTP client: {e}")))?;

        let metadata = discover(&client, &config.issuer_url).await?;

        if metadata.issuer != config.issuer_url {
            if !config.skip_issuer_check {
                return Err(AuthError::Initialization(format!(
                    "issuer mismatch: expected {}, got {}",
                    config.issuer_url, metadata.issuer
                )));
            }
            tracing::warn!(
                configured = %config.issuer_url,
                discovered = %metadata.issuer,
                "OIDC issuer mismatch ignored (issuer check skipped)"
            );
        }

        let jwks = JwksCache::new(
            metadata.jwks_uri,
            DEFAULT_JWKS_REFRESH_INTERVAL,
            DEFAULT_FETCH_TIMEOUT,
        )
        .map_err(|e| AuthError::Initialization(e.to_string()))?;

        tracing::info!(
            issuer = %config.issuer_url,
            client_id = %config.client_id,
            jwks_url = %jwks.jwks_url(),
            "OIDC authenticator initialized"
        );

        Ok(Self {
            config,
            algorithms,
            jwks,
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        validation.set_required_spec_claims(&["exp"]);
        validation.set_audience(&[&self.config.client_id]);
        if !self.config.skip_issuer_check {
            validation.set_issuer(&[&self.config.issuer_url]);
        }
        validation
    }

    async fn verify(&self, token: &str) -> Result<HashMap<String, Value>, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::InvalidToken(format!("failed to parse token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let kid = header.kid.as_deref().unwrap_or_default();
        let keys = self
            .jwks
            .resolve(kid)
            .await
            .map_err(|e| AuthError::InvalidToken(format!("failed to get signing key: {e}")))?;

        let validation = self.validation(header.alg);
        let mut last_error = None;
        for key in keys.iter().filter(|k| k.algorithms.contains(&header.alg)) {
            match decode::<HashMap<String, Value>>(token, &key.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => AuthError::InvalidToken(format!("failed to verify ID token: {e}")),
            None => AuthError::InvalidToken(format!(
                "no signing key for algorithm {:?}",
                header.alg
            )),
        })
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.verify(token).await?;

        let subject = string_claim(&claims, "sub")
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| AuthError::InvalidToken("missing subject".to_string()))?;

        let mut identity = Identity::new(subject, AuthMode::Oidc)
            .with_issuer(string_claim(&claims, "iss").unwrap_or_default())
            .with_audience(audience_from_value(claims.get("aud")));
        identity.email = string_claim(&claims, "email");
        identity.name = string_claim(&claims, "name");

        Ok(identity.with_claims(claims))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Oidc
    }
}

async fn discover(
    client: &reqwest::Client,
    issuer_url: &str,
) -> Result<ProviderMetadata, AuthError> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer_url.trim_end_matches('/')
    );
    tracing::debug!(url = %url, "Fetching OIDC discovery document");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| AuthError::Initialization(format!("failed to fetch OIDC discovery: {e}")))?;

    if !response.status().is_success() {
        return Err(AuthError::Initialization(format!(
            "OIDC discovery returned status {}",
            response.status()
        )));
    }

    response
        .json::<ProviderMetadata>()
        .await
        .map_err(|e| AuthError::Initialization(format!("invalid OIDC discovery response: {e}")))
}

/// Parse configured algorithm names. An empty list means the defaults.
fn parse_algorithms(names: &[String]) -> Result<Vec<Algorithm>, AuthError> {
    let parse = |name: &str| -> Result<Algorithm, AuthError> {
        let alg = Algorithm::from_str(name.trim()).map_err(|_| {
            AuthError::Initialization(format!("unknown signature algorithm {name:?}"))
        })?;
        if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::Initialization(format!(
                "symmetric algorithm {name} is not supported"
            )));
        }
        Ok(alg)
    };

    if names.is_empty() {
        DEFAULT_OIDC_ALGORITHMS.iter().map(|name| parse(*name)).collect()
    } else {
        names.iter().map(|name| parse(name.as_str())).collect()
    }
}

fn string_claim(claims: &HashMap<String, Value>, name: &str) -> Option<String> {
    claims.get(name).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{now, TestServer, KEY_ONE, KEY_TWO};
    use serde_json::json;

    const CLIENT_ID: &str = "gateway-client";

    async fn setup() -> (TestServer, OidcAuthenticator) {
        let server = TestServer::start(vec![KEY_ONE.jwk("k1")]).await;
        let config =
            OidcConfig::new(server.base_url(), CLIENT_ID).with_allowed_algorithms(["EdDSA"]);
        let auth = OidcAuthenticator::new(config).await.unwrap();
        (server, auth)
    }

    fn id_token(server: &TestServer, overrides: Value) -> String {
        let mut claims = json!({
            "iss": server.base_url(),
            "sub": "user-42",
            "aud": CLIENT_ID,
            "exp": now() + 300,
            "iat": now(),
            "email": "ada@example.com",
            "email_verified": true,
            "name": "Ada"
        });
        if let (Some(claims), Some(overrides)) = (claims.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                if v.is_null() {
                    claims.remove(k);
                } else {
                    claims.insert(k.clone(), v.clone());
                }
            }
        }
        KEY_ONE.sign(Some("k1"), &claims)
    }

    #[tokio::test]
    async fn valid_id_token() {
        let (server, auth) = setup().await;
        let identity = auth
            .authenticate(&id_token(&server, json!({})))
            .await
            .unwrap();

        assert_eq!(identity.subject, "user-42");
        assert_eq!(identity.issuer, server.base_url());
        assert_eq!(identity.audience, vec![CLIENT_ID]);
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(identity.name.as_deref(), Some("Ada"));
        assert_eq!(identity.claim("email_verified"), Some(&json!(true)));
        assert_eq!(identity.auth_method, AuthMode::Oidc);
        assert_eq!(auth.mode(), AuthMode::Oidc);
    }

    #[tokio::test]
    async fn rejects_wrong_audience_issuer_and_expiry() {
        let (server, auth) = setup().await;

        for overrides in [
            json!({ "aud": "someone-else" }),
            json!({ "iss": "https://evil.example.com" }),
            json!({ "exp": now() - 3600 }),
            json!({ "exp": null }),
            json!({ "sub": "" }),
        ] {
            let token = id_token(&server, overrides.clone());
            assert!(
                matches!(auth.authenticate(&token).await, Err(AuthError::InvalidToken(_))),
                "{overrides}"
            );
        }
    }

    #[tokio::test]
    async fn leeway_tolerates_recent_expiry() {
        let (server, auth) = setup().await;
        let token = id_token(&server, json!({ "exp": now() - 10 }));
        assert!(auth.authenticate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_key_rejected() {
        let (server, auth) = setup().await;
        let claims = json!({
            "iss": server.base_url(),
            "sub": "user-42",
            "aud": CLIENT_ID,
            "exp": now() + 300
        });
        let token = KEY_TWO.sign(Some("k1"), &claims);
        assert!(matches!(
            auth.authenticate(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn algorithm_outside_allow_list_rejected() {
        let server = TestServer::start(vec![KEY_ONE.jwk("k1")]).await;
        // Defaults (RS256, ES256) do not include EdDSA.
        let auth = OidcAuthenticator::new(OidcConfig::new(server.base_url(), CLIENT_ID))
            .await
            .unwrap();

        let err = auth
            .authenticate(&id_token(&server, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(ref msg) if msg.contains("not allowed")));
        assert_eq!(server.jwks_hits(), 0);
    }

    #[tokio::test]
    async fn issuer_mismatch_fails_construction_unless_skipped() {
        let server = TestServer::start(vec![KEY_ONE.jwk("k1")]).await;
        server.set_issuer("https://other-issuer.example.com");

        let config =
            OidcConfig::new(server.base_url(), CLIENT_ID).with_allowed_algorithms(["EdDSA"]);
        let err = OidcAuthenticator::new(config.clone()).await.unwrap_err();
        assert!(matches!(err, AuthError::Initialization(ref msg) if msg.contains("issuer mismatch")));

        let auth = OidcAuthenticator::new(config.with_skip_issuer_check(true))
            .await
            .unwrap();
        let token = id_token(&server, json!({ "iss": "https://anything.example.com" }));
        assert!(auth.authenticate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn discovery_failure_is_fatal() {
        let server = TestServer::start(vec![]).await;
        let config = OidcConfig::new(format!("{}/no-such-issuer", server.base_url()), CLIENT_ID);

        assert!(matches!(
            OidcAuthenticator::new(config).await,
            Err(AuthError::Initialization(_))
        ));
    }

    #[test]
    fn algorithm_parsing() {
        assert_eq!(
            parse_algorithms(&[]).unwrap(),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
        assert_eq!(
            parse_algorithms(&["EdDSA".to_string(), " PS256 ".to_string()]).unwrap(),
            vec![Algorithm::EdDSA, Algorithm::PS256]
        );
        assert!(parse_algorithms(&["RS999".to_string()]).is_err());
        assert!(parse_algorithms(&["HS256".to_string()]).is_err());
    }
}
