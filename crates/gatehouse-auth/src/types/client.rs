//! Registered client metadata.
//!
//! The engine treats client registration as input: a [`Client`] record says
//! which grant types, scopes, and redirect URIs a client may use, how long
//! its tokens live, and how CIBA callbacks reach it. Registration CRUD
//! itself lives outside the core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// OAuth 2.0 / OIDC authorization grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization code flow (RFC 6749 section 4.1).
    AuthorizationCode,
    /// Implicit flow (RFC 6749 section 4.2).
    Implicit,
    /// Client credentials flow (RFC 6749 section 4.4).
    ClientCredentials,
    /// Refresh token grant (RFC 6749 section 6).
    RefreshToken,
    /// Client-initiated backchannel authentication (OIDC CIBA).
    Ciba,
    /// Device authorization grant (RFC 8628).
    DeviceCode,
    /// UMA permission ticket grant.
    UmaTicket,
}

impl GrantType {
    /// Returns the wire representation of the grant type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::Ciba => "urn:openid:params:grant-type:ciba",
            Self::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
            Self::UmaTicket => "urn:ietf:params:oauth:grant-type:uma-ticket",
        }
    }

    /// Parses a wire grant type string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "implicit" => Some(Self::Implicit),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "urn:openid:params:grant-type:ciba" => Some(Self::Ciba),
            "urn:ietf:params:oauth:grant-type:device_code" => Some(Self::DeviceCode),
            "urn:ietf:params:oauth:grant-type:uma-ticket" => Some(Self::UmaTicket),
            _ => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// CIBA token delivery modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Client polls the token endpoint until the user responds.
    Poll,
    /// Server notifies the client, which then polls the token endpoint.
    Ping,
    /// Server delivers tokens directly to the client notification endpoint.
    Push,
}

impl DeliveryMode {
    /// Returns the wire representation of the delivery mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Ping => "ping",
            Self::Push => "push",
        }
    }

    /// Parses a wire delivery mode string.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "poll" => Some(Self::Poll),
            "ping" => Some(Self::Ping),
            "push" => Some(Self::Push),
            _ => None,
        }
    }

    /// Returns `true` for modes where the server proactively contacts the
    /// client notification endpoint.
    #[must_use]
    pub fn requires_notification_endpoint(&self) -> bool {
        matches!(self, Self::Ping | Self::Push)
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subject identifier types (OIDC Core section 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// Same `sub` value for all clients.
    #[default]
    Public,
    /// Per-sector `sub` values; requires resolvable client keys for
    /// callback protection.
    Pairwise,
}

/// A registered OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier.
    pub client_id: String,

    /// Human-readable client name.
    pub name: String,

    /// Grant types the client is registered for.
    pub grant_types: Vec<GrantType>,

    /// Scopes the client may request. Empty means all scopes allowed.
    pub scopes: Vec<String>,

    /// Registered redirect URIs (exact-match at code exchange).
    pub redirect_uris: Vec<String>,

    /// Whether the client is active. Inactive clients fail all flows.
    pub active: bool,

    /// Subject identifier type.
    #[serde(default)]
    pub subject_type: SubjectType,

    /// Per-client access token lifetime override.
    #[serde(default, with = "humantime_serde")]
    pub access_token_lifetime: Option<Duration>,

    /// Whether refresh tokens may be issued to this client.
    pub allow_refresh_tokens: bool,

    /// CIBA token delivery mode registered for this client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backchannel_delivery_mode: Option<DeliveryMode>,

    /// Endpoint receiving CIBA ping/push callbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backchannel_notification_endpoint: Option<String>,

    /// Inline JWKS document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks: Option<serde_json::Value>,

    /// URI of the client's JWKS document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Sector identifier URI for pairwise subjects and shared URI lists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector_identifier_uri: Option<String>,
}

impl Client {
    /// Creates a minimal active client registered for the code flow.
    #[must_use]
    pub fn new(client_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: name.into(),
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            scopes: vec![],
            redirect_uris: vec![],
            active: true,
            subject_type: SubjectType::Public,
            access_token_lifetime: None,
            allow_refresh_tokens: true,
            backchannel_delivery_mode: None,
            backchannel_notification_endpoint: None,
            jwks: None,
            jwks_uri: None,
            sector_identifier_uri: None,
        }
    }

    /// Returns `true` if the client is registered for the grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Returns `true` if the redirect URI exactly matches a registered one.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    /// Returns `true` if the scope may be requested by this client.
    ///
    /// An empty registered scope list means all scopes are allowed.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|s| s == scope)
    }

    /// Returns `true` if a JWKS is resolvable for this client, either
    /// inline or via `jwks_uri`.
    #[must_use]
    pub fn has_resolvable_jwks(&self) -> bool {
        self.jwks.is_some()
            || self
                .jwks_uri
                .as_deref()
                .map(|u| !u.trim().is_empty())
                .unwrap_or(false)
    }
}
