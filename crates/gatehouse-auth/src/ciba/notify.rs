//! Outbound backchannel notifications.
//!
//! Ping and push callbacks POST JSON to the client's registered
//! notification endpoint, authenticated with the per-request client
//! notification token as a bearer credential. Ping failures never fail
//! the flow; push failures do, because push is the only channel the
//! client has.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::error::{AuthError, AuthResult};
use crate::token::IssuedTokens;

/// POSTs a JSON body to a client endpoint. A seam so flows are testable
/// without a network; production uses [`HttpCallbackTransport`].
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Sends the body, returning the remote HTTP status.
    ///
    /// # Errors
    ///
    /// Returns a transaction error when the endpoint is unreachable.
    async fn post_json(
        &self,
        endpoint: &str,
        bearer: &str,
        body: serde_json::Value,
    ) -> AuthResult<u16>;
}

/// Transport over `reqwest` with a bounded timeout.
pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    /// Creates a transport with the given connect/read timeout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(timeout: std::time::Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("HTTP client build failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post_json(
        &self,
        endpoint: &str,
        bearer: &str,
        body: serde_json::Value,
    ) -> AuthResult<u16> {
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::transaction_failed(format!("callback POST failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

/// Dispatches ping and push notifications.
pub struct CibaNotifier {
    transport: Arc<dyn CallbackTransport>,
}

impl CibaNotifier {
    /// Creates a notifier over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn CallbackTransport>) -> Self {
        Self { transport }
    }

    /// Ping callback: tells the client a decision is available. The
    /// remote status is logged and the flow continues regardless; the
    /// return value only feeds the delivery sub-state.
    pub async fn ping_callback(&self, endpoint: &str, bearer: &str, auth_req_id: &str) -> bool {
        let body = json!({ "auth_req_id": auth_req_id });
        match self.transport.post_json(endpoint, bearer, body).await {
            Ok(status) => {
                debug!(auth_req_id = %auth_req_id, status = status, "ping callback delivered");
                (200..300).contains(&status)
            }
            Err(err) => {
                warn!(auth_req_id = %auth_req_id, error = %err, "ping callback failed");
                false
            }
        }
    }

    /// Push token delivery: the tokens travel in the callback body.
    ///
    /// # Errors
    ///
    /// Returns a transaction error when the endpoint is unreachable or
    /// answers with a non-success status; push has no other channel, so
    /// the caller records the delivery as failed.
    pub async fn push_token_delivery(
        &self,
        endpoint: &str,
        bearer: &str,
        auth_req_id: &str,
        tokens: &IssuedTokens,
    ) -> AuthResult<()> {
        let mut body = serde_json::to_value(tokens)
            .map_err(|e| AuthError::internal(format!("token serialization failed: {e}")))?;
        body["auth_req_id"] = json!(auth_req_id);

        let status = self
            .transport
            .post_json(endpoint, bearer, body)
            .await
            .inspect_err(
                |err| error!(auth_req_id = %auth_req_id, error = %err, "push delivery failed"),
            )?;
        if !(200..300).contains(&status) {
            error!(auth_req_id = %auth_req_id, status = status, "push delivery rejected");
            return Err(AuthError::transaction_failed(format!(
                "push endpoint answered {status}"
            )));
        }
        debug!(auth_req_id = %auth_req_id, "push tokens delivered");
        Ok(())
    }

    /// Push error delivery: a terminal CIBA outcome
    /// (`access_denied`, `expired_token`, `transaction_failed`) over the
    /// same channel. Delivery failures are logged only.
    pub async fn push_error(
        &self,
        endpoint: &str,
        bearer: &str,
        auth_req_id: &str,
        outcome: &AuthError,
    ) {
        let body = json!({
            "auth_req_id": auth_req_id,
            "error": outcome.oauth_error_code(),
            "error_description": outcome.to_string(),
        });
        if let Err(err) = self.transport.post_json(endpoint, bearer, body).await {
            warn!(auth_req_id = %auth_req_id, error = %err, "push error delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingTransport {
        bodies: Mutex<Vec<(String, String, serde_json::Value)>>,
        status: u16,
        fail: bool,
    }

    impl RecordingTransport {
        fn new(status: u16, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(Vec::new()),
                status,
                fail,
            })
        }

        fn sent(&self) -> Vec<(String, String, serde_json::Value)> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CallbackTransport for RecordingTransport {
        async fn post_json(
            &self,
            endpoint: &str,
            bearer: &str,
            body: serde_json::Value,
        ) -> AuthResult<u16> {
            if self.fail {
                return Err(AuthError::transaction_failed("unreachable"));
            }
            self.bodies
                .lock()
                .unwrap()
                .push((endpoint.to_string(), bearer.to_string(), body));
            Ok(self.status)
        }
    }

    fn tokens() -> IssuedTokens {
        IssuedTokens {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            refresh_token: None,
            id_token: None,
            scope: "openid".to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_delivery_carries_tokens() {
        let transport = RecordingTransport::new(200, false);
        let notifier = CibaNotifier::new(Arc::clone(&transport) as Arc<dyn CallbackTransport>);

        notifier
            .push_token_delivery("https://cb", "tok", "req-1", &tokens())
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "tok");
        assert_eq!(sent[0].2["auth_req_id"], "req-1");
        assert_eq!(sent[0].2["access_token"], "at");
    }

    #[tokio::test]
    async fn test_push_delivery_fails_on_remote_rejection() {
        let transport = RecordingTransport::new(500, false);
        let notifier = CibaNotifier::new(transport as Arc<dyn CallbackTransport>);
        let result = notifier
            .push_token_delivery("https://cb", "tok", "req-1", &tokens())
            .await;
        assert!(matches!(result, Err(AuthError::TransactionFailed { .. })));
    }

    #[tokio::test]
    async fn test_ping_failure_never_propagates() {
        let transport = RecordingTransport::new(200, true);
        let notifier = CibaNotifier::new(transport as Arc<dyn CallbackTransport>);
        // No panic, no error surface; only the sub-state signal.
        assert!(!notifier.ping_callback("https://cb", "tok", "req-1").await);
    }

    #[tokio::test]
    async fn test_push_error_body() {
        let transport = RecordingTransport::new(200, false);
        let notifier = CibaNotifier::new(Arc::clone(&transport) as Arc<dyn CallbackTransport>);
        notifier
            .push_error(
                "https://cb",
                "tok",
                "req-1",
                &AuthError::access_denied("user declined"),
            )
            .await;

        let sent = transport.sent();
        assert_eq!(sent[0].2["error"], "access_denied");
        assert_eq!(sent[0].2["auth_req_id"], "req-1");
    }
}
