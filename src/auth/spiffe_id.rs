// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SPIFFE ID parsing.

use std::fmt;

const SCHEME: &str = "spiffe://";

/// A parsed `spiffe://<trust-domain>/<path>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpiffeId {
    id: String,
    trust_domain_len: usize,
}

/// Reasons a string is not a SPIFFE ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpiffeIdError {
    #[error("missing spiffe:// scheme")]
    MissingScheme,

    #[error("empty trust domain")]
    EmptyTrustDomain,

    #[error("invalid character in trust domain")]
    InvalidTrustDomain,
}

impl SpiffeId {
    /// Parse a SPIFFE ID. The path is optional, the trust domain is not.
    pub fn parse(id: &str) -> Result<Self, SpiffeIdError> {
        let rest = id.strip_prefix(SCHEME).ok_or(SpiffeIdError::MissingScheme)?;
        let trust_domain = rest.split('/').next().unwrap_or_default();

        if trust_domain.is_empty() {
            return Err(SpiffeIdError::EmptyTrustDomain);
        }
        if !trust_domain
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        {
            return Err(SpiffeIdError::InvalidTrustDomain);
        }

        Ok(Self {
            id: id.to_string(),
            trust_domain_len: trust_domain.len(),
        })
    }

    /// Trust domain name, e.g. `cluster.local`.
    pub fn trust_domain(&self) -> &str {
        &self.id[SCHEME.len()..SCHEME.len() + self.trust_domain_len]
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// True if this ID belongs to `trust_domain`.
    pub fn is_member_of(&self, trust_domain: &str) -> bool {
        self.trust_domain() == trust_domain
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// True if `subject` is a SPIFFE ID in exactly `trust_domain`.
pub fn is_valid_spiffe_id(subject: &str, trust_domain: &str) -> bool {
    SpiffeId::parse(subject).is_ok_and(|id| id.is_member_of(trust_domain))
}
