//! Authorization grant model.
//!
//! A [`Grant`] is the server-side record of one authorized transaction:
//! client, subject, scopes, the optional single-use authorization code,
//! and every token issued under it. The grant registry owns the
//! authoritative in-memory copy; the entry store holds the durable one.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::grant::token::{AccessToken, IdToken, RefreshToken, generate_token_value};
use crate::types::GrantType;

/// A single-use authorization code attached to a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationCode {
    /// The code value (256-bit random, base64url).
    pub value: String,

    /// When the code expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// When the code was exchanged. A consumed code is never exchangeable
    /// again; a second attempt marks the grant compromised.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub consumed_at: Option<OffsetDateTime>,
}

impl AuthorizationCode {
    /// Generates a fresh unconsumed code.
    #[must_use]
    pub fn generate(lifetime: Duration) -> Self {
        Self {
            value: generate_token_value(),
            expires_at: OffsetDateTime::now_utc() + lifetime,
            consumed_at: None,
        }
    }

    /// Returns `true` if the code has been exchanged.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Returns `true` if the code has passed its expiration time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }
}

/// Server-side record of an authorized OAuth2/OIDC transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// Unique grant identifier.
    pub grant_id: Uuid,

    /// Client the grant belongs to.
    pub client_id: String,

    /// How the grant was established.
    pub grant_type: GrantType,

    /// Subject (end-user) identifier. None for client-credentials grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Scopes granted; every issued token's scopes are a subset.
    pub scopes: BTreeSet<String>,

    /// When the end user authenticated.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub auth_time: Option<OffsetDateTime>,

    /// OpenID Connect nonce for ID token binding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// State parameter from the authorization request, kept for audit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Redirect URI registered at the authorization step; the token
    /// request must present exactly this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// The single-use authorization code, if this is a code-flow grant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<AuthorizationCode>,

    /// CIBA authentication request identifier, if backchannel-initiated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_req_id: Option<String>,

    /// Durable session this grant is tied to, if any; the expiration
    /// sweep removes the grant when the session goes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Access tokens issued under this grant.
    #[serde(default)]
    pub access_tokens: Vec<AccessToken>,

    /// Refresh tokens issued under this grant (hashes only).
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshToken>,

    /// ID tokens issued under this grant.
    #[serde(default)]
    pub id_tokens: Vec<IdToken>,

    /// When the grant was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Grant {
    /// Creates a new grant with no code and no tokens.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        grant_type: GrantType,
        subject: Option<String>,
        scopes: BTreeSet<String>,
    ) -> Self {
        Self {
            grant_id: Uuid::new_v4(),
            client_id: client_id.into(),
            grant_type,
            subject,
            scopes,
            auth_time: None,
            nonce: None,
            state: None,
            redirect_uri: None,
            code: None,
            auth_req_id: None,
            session_id: None,
            access_tokens: Vec::new(),
            refresh_tokens: Vec::new(),
            id_tokens: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Attaches a fresh single-use authorization code.
    #[must_use]
    pub fn with_code(mut self, lifetime: Duration) -> Self {
        self.code = Some(AuthorizationCode::generate(lifetime));
        self
    }

    /// Sets the redirect URI registered at the authorization step.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Sets the OpenID Connect nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub fn with_auth_time(mut self, auth_time: OffsetDateTime) -> Self {
        self.auth_time = Some(auth_time);
        self
    }

    /// Links the grant to a durable session.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Links the grant to a CIBA authentication request.
    #[must_use]
    pub fn with_auth_req_id(mut self, auth_req_id: impl Into<String>) -> Self {
        self.auth_req_id = Some(auth_req_id.into());
        self
    }

    /// Returns `true` if every requested scope is within the grant.
    #[must_use]
    pub fn scopes_allow(&self, requested: &[String]) -> bool {
        requested.iter().all(|s| self.scopes.contains(s))
    }

    /// Returns the access token with the given value, if issued under
    /// this grant.
    #[must_use]
    pub fn access_token(&self, value: &str) -> Option<&AccessToken> {
        self.access_tokens.iter().find(|t| t.data.value == value)
    }

    /// Returns the refresh token with the given hash, if issued under
    /// this grant.
    #[must_use]
    pub fn refresh_token_by_hash(&self, hash: &str) -> Option<&RefreshToken> {
        self.refresh_tokens.iter().find(|t| t.data.value == hash)
    }

    /// Marks every token under the grant revoked.
    ///
    /// Used when a consumed authorization code is replayed (the grant is
    /// treated as compromised) and on explicit revocation or logout.
    pub fn revoke_all_tokens(&mut self) {
        for token in &mut self.access_tokens {
            token.data.revoke();
        }
        for token in &mut self.refresh_tokens {
            token.data.revoke();
        }
        for token in &mut self.id_tokens {
            token.data.revoke();
        }
    }

    /// Latest expiration instant across the code and all tokens; used as
    /// the durable entry's expiration attribute.
    #[must_use]
    pub fn latest_expiry(&self) -> OffsetDateTime {
        let mut latest = self
            .code
            .as_ref()
            .map(|c| c.expires_at)
            .unwrap_or(self.created_at);
        for t in &self.access_tokens {
            latest = latest.max(t.data.expires_at);
        }
        for t in &self.refresh_tokens {
            latest = latest.max(t.data.expires_at);
        }
        for t in &self.id_tokens {
            latest = latest.max(t.data.expires_at);
        }
        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_code_lifecycle() {
        let code = AuthorizationCode::generate(Duration::from_secs(600));
        assert!(!code.is_consumed());
        assert!(!code.is_expired());
        assert_eq!(code.value.len(), 43);

        let code = AuthorizationCode::generate(Duration::ZERO);
        assert!(code.is_expired());
    }

    #[test]
    fn test_scope_subset_check() {
        let grant = Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes(&["openid", "profile"]),
        );

        assert!(grant.scopes_allow(&["profile".to_string()]));
        assert!(grant.scopes_allow(&["openid".to_string(), "profile".to_string()]));
        assert!(!grant.scopes_allow(&["email".to_string()]));
        assert!(grant.scopes_allow(&[]));
    }

    #[test]
    fn test_revoke_all_tokens() {
        let mut grant = Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes(&["openid"]),
        );
        grant.access_tokens.push(AccessToken::new(
            generate_token_value(),
            Duration::from_secs(3600),
            vec!["openid".to_string()],
        ));
        grant
            .refresh_tokens
            .push(RefreshToken::from_plaintext("rt", Duration::from_secs(3600)));

        grant.revoke_all_tokens();
        assert!(grant.access_tokens.iter().all(|t| t.data.is_revoked()));
        assert!(grant.refresh_tokens.iter().all(|t| t.data.is_revoked()));
    }

    #[test]
    fn test_latest_expiry_tracks_tokens() {
        let mut grant = Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes(&["openid"]),
        )
        .with_code(Duration::from_secs(600));

        let code_expiry = grant.code.as_ref().unwrap().expires_at;
        assert_eq!(grant.latest_expiry(), code_expiry);

        grant.access_tokens.push(AccessToken::new(
            generate_token_value(),
            Duration::from_secs(7200),
            vec!["openid".to_string()],
        ));
        assert!(grant.latest_expiry() > code_expiry);
    }

    #[test]
    fn test_grant_serde_roundtrip() {
        let grant = Grant::new(
            "app-1",
            GrantType::Ciba,
            Some("user-1".to_string()),
            scopes(&["openid"]),
        )
        .with_auth_req_id("req-123")
        .with_nonce("n-1");

        let json = serde_json::to_value(&grant).unwrap();
        let back: Grant = serde_json::from_value(json).unwrap();
        assert_eq!(back.grant_id, grant.grant_id);
        assert_eq!(back.grant_type, GrantType::Ciba);
        assert_eq!(back.auth_req_id.as_deref(), Some("req-123"));
    }
}
