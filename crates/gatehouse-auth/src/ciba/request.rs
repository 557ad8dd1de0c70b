//! Backchannel authentication request model.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use gatehouse_config::CibaConfig;

use crate::grant::generate_token_value;
use crate::types::DeliveryMode;

/// Lifecycle status of a backchannel authentication request.
///
/// `Pending` transitions to exactly one terminal status; terminal states
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CibaStatus {
    /// Waiting for the end user's decision.
    Pending,
    /// The end user approved; a grant exists.
    Granted,
    /// The end user denied the request.
    Denied,
    /// The request expired before a decision.
    Expired,
}

impl CibaStatus {
    /// Returns `true` for a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for CibaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Outcome of the ping/push notification sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// No notification applies (poll mode) or none attempted yet.
    #[default]
    None,
    /// A notification is being attempted.
    Pending,
    /// The client acknowledged the notification.
    Delivered,
    /// The notification failed; the client will only learn by polling.
    Failed,
}

/// One backchannel authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CibaRequest {
    /// Request identifier handed back to the client (256-bit random).
    pub auth_req_id: String,

    /// Requesting client.
    pub client_id: String,

    /// Subject the authentication request targets.
    pub subject: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// How tokens reach the client once the user decides.
    pub delivery_mode: DeliveryMode,

    /// Bearer token for ping/push callbacks to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_notification_token: Option<String>,

    /// Message displayed on both consumption and authentication devices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding_message: Option<String>,

    /// Secret the end user types on the authentication device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,

    /// Current lifecycle status.
    pub status: CibaStatus,

    /// Notification sub-step state for ping/push.
    #[serde(default)]
    pub delivery: DeliveryState,

    /// Poll interval hint in seconds.
    pub interval: u64,

    /// When the request was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the request expires if still pending.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl CibaRequest {
    /// Creates a pending request. The client-requested expiry is clamped
    /// to the configured maximum; absent, the configured default applies.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        subject: impl Into<String>,
        scopes: Vec<String>,
        delivery_mode: DeliveryMode,
        requested_expiry: Option<Duration>,
        config: &CibaConfig,
    ) -> Self {
        let lifetime = requested_expiry
            .map(|d| d.min(config.max_requested_expiry))
            .unwrap_or(config.default_request_lifetime);
        let now = OffsetDateTime::now_utc();
        Self {
            auth_req_id: generate_token_value(),
            client_id: client_id.into(),
            subject: subject.into(),
            scopes,
            delivery_mode,
            client_notification_token: None,
            binding_message: None,
            user_code: None,
            status: CibaStatus::Pending,
            delivery: DeliveryState::default(),
            interval: config.poll_interval_secs,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    /// Sets the client notification token for ping/push callbacks.
    #[must_use]
    pub fn with_notification_token(mut self, token: impl Into<String>) -> Self {
        self.client_notification_token = Some(token.into());
        self
    }

    /// Sets the binding message.
    #[must_use]
    pub fn with_binding_message(mut self, message: impl Into<String>) -> Self {
        self.binding_message = Some(message.into());
        self
    }

    /// Sets the user code.
    #[must_use]
    pub fn with_user_code(mut self, code: impl Into<String>) -> Self {
        self.user_code = Some(code.into());
        self
    }

    /// Returns `true` if the request has passed its expiration time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    /// Remaining lifetime in whole seconds, clamped at zero.
    #[must_use]
    pub fn expires_in(&self) -> u64 {
        let remaining = self.expires_at - OffsetDateTime::now_utc();
        remaining.whole_seconds().max(0) as u64
    }

    /// Moves a pending request to a terminal status. Returns `false`, and
    /// changes nothing, when the request is already terminal.
    pub fn resolve(&mut self, status: CibaStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CibaConfig {
        CibaConfig::default()
    }

    #[test]
    fn test_new_request_shape() {
        let request = CibaRequest::new(
            "app-1",
            "user-1",
            vec!["openid".to_string()],
            DeliveryMode::Poll,
            None,
            &config(),
        );
        assert_eq!(request.auth_req_id.len(), 43);
        assert_eq!(request.status, CibaStatus::Pending);
        assert_eq!(request.delivery, DeliveryState::None);
        assert!(!request.is_expired());
        assert!(request.expires_in() <= config().default_request_lifetime.as_secs());
    }

    #[test]
    fn test_requested_expiry_is_clamped() {
        let request = CibaRequest::new(
            "app-1",
            "user-1",
            vec![],
            DeliveryMode::Poll,
            Some(Duration::from_secs(999_999)),
            &config(),
        );
        assert!(request.expires_in() <= config().max_requested_expiry.as_secs());

        let request = CibaRequest::new(
            "app-1",
            "user-1",
            vec![],
            DeliveryMode::Poll,
            Some(Duration::from_secs(30)),
            &config(),
        );
        assert!(request.expires_in() <= 30);
    }

    #[test]
    fn test_single_terminal_transition() {
        let mut request = CibaRequest::new(
            "app-1",
            "user-1",
            vec![],
            DeliveryMode::Poll,
            None,
            &config(),
        );
        assert!(request.resolve(CibaStatus::Granted));
        assert_eq!(request.status, CibaStatus::Granted);

        // Terminal states never change again.
        assert!(!request.resolve(CibaStatus::Denied));
        assert!(!request.resolve(CibaStatus::Expired));
        assert_eq!(request.status, CibaStatus::Granted);

        // Pending is not a terminal target.
        let mut request = CibaRequest::new(
            "app-1",
            "user-1",
            vec![],
            DeliveryMode::Poll,
            None,
            &config(),
        );
        assert!(!request.resolve(CibaStatus::Pending));
        assert_eq!(request.status, CibaStatus::Pending);
    }
}
