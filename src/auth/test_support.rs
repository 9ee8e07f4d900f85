// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared fixtures for authentication tests: Ed25519 signing keys, a local
//! JWKS / OIDC discovery server and a scripted authenticator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use super::spiffe::{SvidError, SvidValidator, ValidatedSvid};
use super::{AuthMode, Authenticator, Identity};
use crate::error::AuthError;

/// PKCS#8 v1 prefix for a bare Ed25519 seed.
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// Ed25519 key pair from the RFC 8032 test vectors.
pub struct TestKey {
    seed: [u8; 32],
    x: &'static str,
}

pub const KEY_ONE: TestKey = TestKey {
    seed: [
        0x9d, 0x61, 0xb1, 0x9d, 0xef, 0xfd, 0x5a, 0x60, 0xba, 0x84, 0x4a, 0xf4, 0x92, 0xec, 0x2c,
        0xc4, 0x44, 0x49, 0xc5, 0x69, 0x7b, 0x32, 0x69, 0x19, 0x70, 0x3b, 0xac, 0x03, 0x1c, 0xae,
        0x7f, 0x60,
    ],
    x: "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo",
};

pub const KEY_TWO: TestKey = TestKey {
    seed: [
        0x4c, 0xcd, 0x08, 0x9b, 0x28, 0xff, 0x96, 0xda, 0x9d, 0xb6, 0xc3, 0x46, 0xec, 0x11, 0x4e,
        0x0f, 0x5b, 0x8a, 0x31, 0x9f, 0x35, 0xab, 0xa6, 0x24, 0xda, 0x8c, 0xf6, 0xed, 0x4f, 0xb8,
        0xa6, 0xfb,
    ],
    x: "PUAXw-hDiVqStwqnTRt-vJyYLM8uxJaMwM1V8Sr0Zgw",
};

impl TestKey {
    /// Public key, base64url.
    pub fn x(&self) -> &'static str {
        self.x
    }

    pub fn encoding_key(&self) -> EncodingKey {
        let mut der = ED25519_PKCS8_PREFIX.to_vec();
        der.extend_from_slice(&self.seed);
        EncodingKey::from_ed_der(&der)
    }

    /// Public JWK with the given key ID.
    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.x,
            "kid": kid,
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    /// Sign `claims` with EdDSA.
    pub fn sign(&self, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.encoding_key()).unwrap()
    }
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Clone)]
struct ServerState {
    base_url: String,
    keys: Arc<RwLock<Vec<Value>>>,
    issuer: Arc<RwLock<Option<String>>>,
    jwks_hits: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

/// Local HTTP server publishing a JWKS and an OIDC discovery document.
pub struct TestServer {
    state: ServerState,
}

impl TestServer {
    pub async fn start(keys: Vec<Value>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let state = ServerState {
            base_url: format!("http://{addr}"),
            keys: Arc::new(RwLock::new(keys)),
            issuer: Arc::new(RwLock::new(None)),
            jwks_hits: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route("/jwks.json", get(jwks_handler))
            .route("/.well-known/openid-configuration", get(discovery_handler))
            .route("/garbage", get(|| async { "definitely not json" }))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { state }
    }

    pub fn base_url(&self) -> &str {
        &self.state.base_url
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/jwks.json", self.state.base_url)
    }

    pub fn set_keys(&self, keys: Vec<Value>) {
        *self.state.keys.write().unwrap() = keys;
    }

    /// Make the JWKS endpoint answer 500.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Override the `issuer` advertised by discovery.
    pub fn set_issuer(&self, issuer: impl Into<String>) {
        *self.state.issuer.write().unwrap() = Some(issuer.into());
    }

    pub fn jwks_hits(&self) -> usize {
        self.state.jwks_hits.load(Ordering::SeqCst)
    }
}

async fn jwks_handler(State(state): State<ServerState>) -> Response {
    state.jwks_hits.fetch_add(1, Ordering::SeqCst);
    if state.failing.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let keys = state.keys.read().unwrap().clone();
    Json(json!({ "keys": keys })).into_response()
}

async fn discovery_handler(State(state): State<ServerState>) -> Json<Value> {
    let issuer = state
        .issuer
        .read()
        .unwrap()
        .clone()
        .unwrap_or_else(|| state.base_url.clone());
    Json(json!({
        "issuer": issuer,
        "jwks_uri": format!("{}/jwks.json", state.base_url),
        "id_token_signing_alg_values_supported": ["EdDSA", "RS256"]
    }))
}

/// Authenticator returning a fixed outcome and recording each call.
pub struct StaticAuthenticator {
    name: &'static str,
    mode: AuthMode,
    outcome: Result<Identity, AuthError>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl StaticAuthenticator {
    pub fn accepting(
        name: &'static str,
        identity: Identity,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Self {
        Self {
            name,
            mode: identity.auth_method,
            outcome: Ok(identity),
            calls: Arc::clone(calls),
        }
    }

    pub fn rejecting(
        name: &'static str,
        mode: AuthMode,
        error: AuthError,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Self {
        Self {
            name,
            mode,
            outcome: Err(error),
            calls: Arc::clone(calls),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, _token: &str) -> Result<Identity, AuthError> {
        self.calls.lock().unwrap().push(self.name);
        self.outcome.clone()
    }

    fn mode(&self) -> AuthMode {
        self.mode
    }
}

/// SVID validator accepting a fixed set of tokens.
#[derive(Clone, Default)]
pub struct FakeSvidValidator {
    svids: Arc<Mutex<HashMap<String, ValidatedSvid>>>,
    audiences: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl FakeSvidValidator {
    /// Accept `token` as an SVID for `spiffe_id` addressed to `audience`.
    pub fn accept(self, token: &str, spiffe_id: &str, audience: &str) -> Self {
        let mut claims = HashMap::new();
        claims.insert("sub".to_string(), Value::from(spiffe_id));
        claims.insert("aud".to_string(), json!([audience]));
        self.svids.lock().unwrap().insert(
            token.to_string(),
            ValidatedSvid {
                spiffe_id: spiffe_id.to_string(),
                audience: vec![audience.to_string()],
                claims,
            },
        );
        self
    }

    /// Audiences requested so far.
    pub fn audiences(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.audiences)
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl SvidValidator for FakeSvidValidator {
    async fn validate(&self, token: &str, audience: &str) -> Result<ValidatedSvid, SvidError> {
        self.audiences.lock().unwrap().push(audience.to_string());
        let svid = self
            .svids
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| SvidError::Invalid("unknown token".to_string()))?;
        if !svid.audience.iter().any(|aud| aud == audience) {
            return Err(SvidError::Invalid("audience mismatch".to_string()));
        }
        Ok(svid)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
