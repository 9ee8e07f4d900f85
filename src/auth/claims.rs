// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claim types shared by the authenticators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Claims carried by Dapr Sentry tokens.
///
/// Sentry puts a SPIFFE ID in `sub` and sets no meaningful `iss`. All fields
/// are optional here; the authenticator decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SentryClaims {
    /// Subject (SPIFFE ID of the caller)
    #[serde(default)]
    pub sub: Option<String>,

    /// Issuer (logged only)
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience, either a single string or an array
    #[serde(default, deserialize_with = "audience")]
    pub aud: Vec<String>,

    /// Expiration timestamp
    #[serde(default, deserialize_with = "numeric_date")]
    pub exp: Option<i64>,

    /// Not before timestamp
    #[serde(default, deserialize_with = "numeric_date")]
    pub nbf: Option<i64>,

    /// Issued at timestamp
    #[serde(default, deserialize_with = "numeric_date")]
    pub iat: Option<i64>,

    /// Token ID
    #[serde(default)]
    pub jti: Option<String>,

    /// Sentry-specific key use marker
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

impl SentryClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.map(to_datetime)
    }

    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.nbf.map(to_datetime)
    }
}

/// Seconds since the epoch, clamped to the representable range.
fn to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(if ts < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Deserialize an `aud` claim that may be a string or an array of strings.
pub fn audience<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(aud)) => vec![aud],
        Some(OneOrMany::Many(auds)) => auds,
        None => Vec::new(),
    })
}

/// Audience list from an untyped claim value.
pub fn audience_from_value(value: Option<&serde_json::Value>) -> Vec<String> {
    match value {
        Some(serde_json::Value::String(aud)) => vec![aud.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Deserialize a NumericDate, which RFC 7519 allows to be fractional.
pub fn numeric_date<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.map(|secs| secs.floor() as i64))
}

/// True if `expected` is one of `audiences`.
pub fn contains_audience(audiences: &[String], expected: &str) -> bool {
    audiences.iter().any(|aud| aud == expected)
}
