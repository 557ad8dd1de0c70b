//! Token domain types.
//!
//! Access, refresh, and ID tokens share one [`TokenData`] core: an opaque
//! value, an issuance/expiration window, and a one-way revocation mark.
//! Tokens are immutable once issued except for that mark, which is set at
//! most once and never cleared, so `is_valid()` is monotonic: once false,
//! it stays false.
//!
//! # Security
//!
//! - Opaque values are 256 bits of CSPRNG output, base64url-encoded
//!   (43 characters), exceeding the 128-bit minimum recommended for
//!   bearer credentials.
//! - Refresh tokens are persisted as SHA-256 hashes only; the plaintext is
//!   returned to the client once and never stored.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Kinds of issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Bearer access token.
    Access,
    /// Refresh token.
    Refresh,
    /// OpenID Connect ID token (JWT).
    Id,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access_token"),
            Self::Refresh => write!(f, "refresh_token"),
            Self::Id => write!(f, "id_token"),
        }
    }
}

/// Generates a cryptographically unpredictable opaque token value.
///
/// 32 bytes of CSPRNG output, base64url without padding (43 characters).
#[must_use]
pub fn generate_token_value() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Common core of every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    /// Opaque token value (or serialized JWT for ID tokens).
    pub value: String,

    /// When the token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// When the token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When the token was explicitly revoked (None = not revoked).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub revoked_at: Option<OffsetDateTime>,
}

impl TokenData {
    /// Creates token data expiring after `lifetime` from now.
    #[must_use]
    pub fn new(value: String, lifetime: std::time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            value,
            issued_at: now,
            expires_at: now + lifetime,
            revoked_at: None,
        }
    }

    /// Returns `true` if the token has passed its expiration time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Returns `true` if the token has been explicitly revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Returns `true` iff not revoked and not expired.
    ///
    /// Monotonic: revocation is never undone and the expiration instant
    /// never moves, so a token that was ever invalid stays invalid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }

    /// Marks the token revoked. Idempotent; the first revocation instant
    /// is kept.
    pub fn revoke(&mut self) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(OffsetDateTime::now_utc());
        }
    }

    /// Remaining lifetime in whole seconds, clamped at zero.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        let remaining = self.expires_at - OffsetDateTime::now_utc();
        remaining.whole_seconds().max(0) as u64
    }
}

/// A bearer access token bound to a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    /// Shared token core.
    #[serde(flatten)]
    pub data: TokenData,

    /// Scopes granted to this token; always a subset of the owning
    /// grant's scopes.
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// Creates a new access token.
    #[must_use]
    pub fn new(value: String, lifetime: std::time::Duration, scopes: Vec<String>) -> Self {
        Self {
            data: TokenData::new(value, lifetime),
            scopes,
        }
    }

    /// Returns `true` iff not revoked and not expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.is_valid()
    }

    /// Returns the scopes as a space-separated string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// A refresh token bound to a grant.
///
/// The authoritative record keeps only the SHA-256 hash; the plaintext is
/// handed to the client at issuance and never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshToken {
    /// Shared token core. `value` holds the hash, not the plaintext.
    #[serde(flatten)]
    pub data: TokenData,
}

impl RefreshToken {
    /// Creates a refresh token record from a plaintext value.
    #[must_use]
    pub fn from_plaintext(plaintext: &str, lifetime: std::time::Duration) -> Self {
        Self {
            data: TokenData::new(Self::hash(plaintext), lifetime),
        }
    }

    /// Hashes a plaintext refresh token (SHA-256, hex).
    #[must_use]
    pub fn hash(plaintext: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the stored hash.
    #[must_use]
    pub fn hash_value(&self) -> &str {
        &self.data.value
    }

    /// Returns `true` iff not revoked and not expired.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data.is_valid()
    }
}

/// An OpenID Connect ID token (serialized JWT).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdToken {
    /// Shared token core. `value` holds the serialized JWT.
    #[serde(flatten)]
    pub data: TokenData,
}

impl IdToken {
    /// Creates an ID token record from a serialized JWT.
    #[must_use]
    pub fn new(jwt: String, lifetime: std::time::Duration) -> Self {
        Self {
            data: TokenData::new(jwt, lifetime),
        }
    }
}
