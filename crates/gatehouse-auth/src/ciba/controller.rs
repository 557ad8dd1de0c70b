//! Backchannel flow orchestration.
//!
//! The controller owns the live [`CibaRequest`] set the same way the
//! grant registry owns grants: authoritative in-memory map under one
//! mutex, write-through persistence to the entry store with compensating
//! logging. Terminal transitions happen under the lock, so a request
//! resolves exactly once no matter how calls interleave.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use gatehouse_config::CibaConfig;
use gatehouse_storage::{DynEntryStore, Entry, EntryKey, EntryKind, attr};

use crate::ciba::notify::CibaNotifier;
use crate::ciba::request::{CibaRequest, CibaStatus, DeliveryState};
use crate::ciba::validator::CibaValidator;
use crate::error::{AuthError, AuthResult};
use crate::events::DynEventSink;
use crate::grant::Grant;
use crate::token::{IssuedTokens, TokenService};
use crate::types::{Client, DeliveryMode, DynClientDirectory, GrantType};

/// End-user decision driving a pending request to a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CibaOutcome {
    /// The user approved the request.
    Granted,
    /// The user denied the request.
    Denied,
}

/// Input to a backchannel authentication request.
#[derive(Debug, Clone)]
pub struct BackchannelParams {
    /// Requesting client.
    pub client_id: String,
    /// Subject the request targets (resolved login hint).
    pub subject: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Bearer token for ping/push callbacks.
    pub client_notification_token: Option<String>,
    /// Message shown on both devices.
    pub binding_message: Option<String>,
    /// Secret the user types on the authentication device.
    pub user_code: Option<String>,
    /// Client-requested request lifetime, clamped by configuration.
    pub requested_expiry: Option<Duration>,
}

/// Successful backchannel initiation response (CIBA core section 7.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackchannelAuthResponse {
    /// Identifier the client presents to retrieve tokens.
    pub auth_req_id: String,
    /// Request lifetime in seconds.
    pub expires_in: u64,
    /// Minimum seconds between token endpoint polls (poll/ping only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
}

/// Drives backchannel authentication requests through their lifecycle.
pub struct CibaFlowController {
    store: DynEntryStore,
    requests: Mutex<HashMap<String, CibaRequest>>,
    clients: DynClientDirectory,
    tokens: Arc<TokenService>,
    validator: CibaValidator,
    notifier: CibaNotifier,
    events: DynEventSink,
    config: CibaConfig,
}

impl CibaFlowController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        store: DynEntryStore,
        clients: DynClientDirectory,
        tokens: Arc<TokenService>,
        validator: CibaValidator,
        notifier: CibaNotifier,
        events: DynEventSink,
        config: CibaConfig,
    ) -> Self {
        Self {
            store,
            requests: Mutex::new(HashMap::new()),
            clients,
            tokens,
            validator,
            notifier,
            events,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CibaRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_for(request: &CibaRequest) -> AuthResult<Entry> {
        let payload = serde_json::to_value(request)
            .map_err(|e| AuthError::internal(format!("request serialization failed: {e}")))?;
        Ok(
            Entry::new(EntryKey::new(&request.auth_req_id, EntryKind::CibaRequest))
                .with_attr(attr::CLIENT_ID, request.client_id.clone())
                .with_attr(attr::EXPIRES_AT, request.expires_at)
                .with_attr(attr::DELETABLE, true)
                .with_payload(payload),
        )
    }

    async fn write_through(&self, request: &CibaRequest) {
        let entry = match Self::entry_for(request) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(auth_req_id = %request.auth_req_id, error = %err, "request write-through skipped");
                return;
            }
        };
        if let Err(err) = self.store.merge(entry).await {
            warn!(auth_req_id = %request.auth_req_id, error = %err, "request write-through failed");
        }
    }

    /// Drops a request from the live set and the store. Idempotent.
    ///
    /// Called once a terminal outcome has been reported: after token
    /// retrieval, after a push delivery, and by the expiration sweep once
    /// `expire` has run. A retired `auth_req_id` is unknown afterwards.
    pub async fn retire(&self, auth_req_id: &str) {
        self.lock().remove(auth_req_id);
        let key = EntryKey::new(auth_req_id, EntryKind::CibaRequest);
        if let Err(err) = self.store.remove(&key).await {
            warn!(auth_req_id = %auth_req_id, error = %err, "durable request removal failed");
        }
    }

    async fn require_client(&self, client_id: &str) -> AuthResult<Client> {
        let client = self
            .clients
            .find_client(client_id)
            .await?
            .ok_or_else(|| AuthError::unauthorized_client("unknown client"))?;
        if !client.active {
            return Err(AuthError::unauthorized_client("client is inactive"));
        }
        Ok(client)
    }

    /// Opens a backchannel authentication request.
    ///
    /// Validates the client's backchannel registration, persists the
    /// pending request, and returns the `auth_req_id` the client will
    /// present later.
    ///
    /// # Errors
    ///
    /// Client policy and registration failures per the validator; storage
    /// errors from persistence.
    pub async fn initiate(&self, params: BackchannelParams) -> AuthResult<BackchannelAuthResponse> {
        let client = self.require_client(&params.client_id).await?;
        for scope in &params.scopes {
            if !client.is_scope_allowed(scope) {
                return Err(AuthError::invalid_scope(format!(
                    "scope '{scope}' is not allowed for this client"
                )));
            }
        }
        self.validator
            .validate_backchannel(&client, params.client_notification_token.as_deref())
            .await?;

        // Validated Some by the delivery mode check above.
        let mode = client
            .backchannel_delivery_mode
            .ok_or_else(|| AuthError::internal("delivery mode vanished after validation"))?;

        let mut request = CibaRequest::new(
            &params.client_id,
            &params.subject,
            params.scopes,
            mode,
            params.requested_expiry,
            &self.config,
        );
        if let Some(token) = params.client_notification_token {
            request = request.with_notification_token(token);
        }
        if let Some(message) = params.binding_message {
            request = request.with_binding_message(message);
        }
        if let Some(code) = params.user_code {
            request = request.with_user_code(code);
        }

        self.store.persist(Self::entry_for(&request)?).await?;
        let response = BackchannelAuthResponse {
            auth_req_id: request.auth_req_id.clone(),
            expires_in: request.expires_in(),
            interval: matches!(mode, DeliveryMode::Poll | DeliveryMode::Ping)
                .then_some(request.interval),
        };
        debug!(
            auth_req_id = %request.auth_req_id,
            client_id = %request.client_id,
            delivery_mode = %mode,
            "backchannel request opened"
        );
        self.lock().insert(request.auth_req_id.clone(), request);
        Ok(response)
    }

    /// Applies the end user's decision to a pending request.
    ///
    /// Exactly one call succeeds per request. On approval a grant is
    /// created; push mode additionally mints and delivers tokens, ping
    /// mode notifies the client, poll mode waits for the client.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown or already-resolved request,
    /// `ExpiredToken` when the request expired before the decision.
    pub async fn complete(&self, auth_req_id: &str, outcome: CibaOutcome) -> AuthResult<()> {
        let request = {
            let mut requests = self.lock();
            let request = requests
                .get_mut(auth_req_id)
                .ok_or_else(|| AuthError::invalid_grant("unknown auth_req_id"))?;

            if request.status == CibaStatus::Pending && request.is_expired() {
                request.resolve(CibaStatus::Expired);
                let snapshot = request.clone();
                drop(requests);
                self.finish_expired(&snapshot).await;
                return Err(AuthError::expired_token(
                    "backchannel request expired before the decision",
                ));
            }

            let target = match outcome {
                CibaOutcome::Granted => CibaStatus::Granted,
                CibaOutcome::Denied => CibaStatus::Denied,
            };
            if !request.resolve(target) {
                return Err(AuthError::invalid_grant(
                    "backchannel request already resolved",
                ));
            }
            request.clone()
        };
        self.write_through(&request).await;
        self.events
            .ciba_outcome(&request.auth_req_id, request.status)
            .await;

        match outcome {
            CibaOutcome::Granted => {
                self.finish_granted(&request).await?;
                // A push client never polls, so a delivered request has
                // nothing left to serve. Failed deliveries stay visible
                // until the expiration sweep retires them.
                if request.delivery_mode == DeliveryMode::Push
                    && self
                        .request(&request.auth_req_id)
                        .is_some_and(|r| r.delivery == DeliveryState::Delivered)
                {
                    self.retire(&request.auth_req_id).await;
                }
                Ok(())
            }
            CibaOutcome::Denied => {
                self.finish_denied(&request).await;
                if request.delivery_mode == DeliveryMode::Push {
                    self.retire(&request.auth_req_id).await;
                }
                Ok(())
            }
        }
    }

    async fn finish_granted(&self, request: &CibaRequest) -> AuthResult<()> {
        let scopes: BTreeSet<String> = request.scopes.iter().cloned().collect();
        let grant = Grant::new(
            &request.client_id,
            GrantType::Ciba,
            Some(request.subject.clone()),
            scopes,
        )
        .with_auth_req_id(&request.auth_req_id)
        .with_auth_time(OffsetDateTime::now_utc());
        let grant_id = grant.grant_id;
        self.tokens.registry().create_grant(grant).await?;

        match request.delivery_mode {
            DeliveryMode::Poll => Ok(()),
            DeliveryMode::Ping => {
                let delivered = match self.callback_target(request).await {
                    Some((endpoint, bearer)) => {
                        self.notifier
                            .ping_callback(&endpoint, &bearer, &request.auth_req_id)
                            .await
                    }
                    None => false,
                };
                self.record_delivery(
                    &request.auth_req_id,
                    if delivered {
                        DeliveryState::Delivered
                    } else {
                        DeliveryState::Failed
                    },
                )
                .await;
                Ok(())
            }
            DeliveryMode::Push => {
                self.record_delivery(&request.auth_req_id, DeliveryState::Pending)
                    .await;
                let tokens = self.tokens.issue_tokens_for_grant(grant_id).await?;
                let delivery = match self.callback_target(request).await {
                    Some((endpoint, bearer)) => self
                        .notifier
                        .push_token_delivery(&endpoint, &bearer, &request.auth_req_id, &tokens)
                        .await
                        .map(|()| DeliveryState::Delivered)
                        .unwrap_or(DeliveryState::Failed),
                    None => DeliveryState::Failed,
                };
                self.record_delivery(&request.auth_req_id, delivery).await;
                Ok(())
            }
        }
    }

    async fn finish_denied(&self, request: &CibaRequest) {
        match request.delivery_mode {
            DeliveryMode::Poll => {}
            DeliveryMode::Ping => {
                if let Some((endpoint, bearer)) = self.callback_target(request).await {
                    self.notifier
                        .ping_callback(&endpoint, &bearer, &request.auth_req_id)
                        .await;
                }
            }
            DeliveryMode::Push => {
                if let Some((endpoint, bearer)) = self.callback_target(request).await {
                    self.notifier
                        .push_error(
                            &endpoint,
                            &bearer,
                            &request.auth_req_id,
                            &AuthError::access_denied("the end user denied the request"),
                        )
                        .await;
                }
            }
        }
    }

    async fn finish_expired(&self, request: &CibaRequest) {
        self.write_through(request).await;
        self.events
            .ciba_outcome(&request.auth_req_id, CibaStatus::Expired)
            .await;
        if request.delivery_mode == DeliveryMode::Push
            && let Some((endpoint, bearer)) = self.callback_target(request).await
        {
            self.notifier
                .push_error(
                    &endpoint,
                    &bearer,
                    &request.auth_req_id,
                    &AuthError::expired_token("the backchannel request expired"),
                )
                .await;
        }
    }

    /// Resolves the notification endpoint and bearer for a request. The
    /// endpoint lives on the client record; it was validated at
    /// initiation, so a miss here only means deregistration since.
    async fn callback_target(&self, request: &CibaRequest) -> Option<(String, String)> {
        let bearer = request.client_notification_token.clone()?;
        let client = self.clients.find_client(&request.client_id).await.ok()??;
        let endpoint = client.backchannel_notification_endpoint?;
        Some((endpoint, bearer))
    }

    /// Expires a pending request. Driven by the expiration sweep; unknown
    /// or already-terminal requests are a no-op.
    pub async fn expire(&self, auth_req_id: &str) {
        let request = {
            let mut requests = self.lock();
            let Some(request) = requests.get_mut(auth_req_id) else {
                return;
            };
            if !request.resolve(CibaStatus::Expired) {
                return;
            }
            request.clone()
        };
        debug!(auth_req_id = %auth_req_id, "backchannel request expired");
        self.finish_expired(&request).await;
    }

    /// Token retrieval for poll and ping clients (CIBA token endpoint).
    ///
    /// Granted requests yield the token set exactly once; the request is
    /// retired afterwards. Denied and expired requests report their
    /// outcome once and are retired too.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` while pending or for an unknown/foreign request,
    /// `AccessDenied`/`ExpiredToken` for those outcomes,
    /// `UnauthorizedClient` for client policy failures.
    pub async fn exchange_backchannel(
        &self,
        auth_req_id: &str,
        client_id: &str,
    ) -> AuthResult<IssuedTokens> {
        let client = self.require_client(client_id).await?;
        if !client.is_grant_type_allowed(GrantType::Ciba) {
            return Err(AuthError::unauthorized_client(
                "client is not registered for the CIBA grant type",
            ));
        }

        let (status, mode, expired_now) = {
            let mut requests = self.lock();
            let request = requests
                .get_mut(auth_req_id)
                .ok_or_else(|| AuthError::invalid_grant("unknown auth_req_id"))?;
            if request.client_id != client_id {
                return Err(AuthError::invalid_grant(
                    "auth_req_id issued to another client",
                ));
            }
            let expired_now =
                request.status == CibaStatus::Pending && request.is_expired() && {
                    request.resolve(CibaStatus::Expired);
                    true
                };
            (request.status, request.delivery_mode, expired_now)
        };

        if expired_now {
            let snapshot = self.lock().get(auth_req_id).cloned();
            if let Some(snapshot) = snapshot {
                self.finish_expired(&snapshot).await;
            }
        }

        match status {
            CibaStatus::Pending => Err(AuthError::invalid_grant(
                "the authorization request is still pending",
            )),
            CibaStatus::Denied => {
                self.retire(auth_req_id).await;
                Err(AuthError::access_denied("the end user denied the request"))
            }
            CibaStatus::Expired => {
                self.retire(auth_req_id).await;
                Err(AuthError::expired_token("the backchannel request expired"))
            }
            CibaStatus::Granted => {
                if mode == DeliveryMode::Push {
                    return Err(AuthError::invalid_request(
                        "push mode clients receive tokens over the notification channel",
                    ));
                }
                let grant = self
                    .tokens
                    .registry()
                    .grant_by_auth_req_id(auth_req_id)
                    .ok_or_else(|| AuthError::invalid_grant("no grant for this auth_req_id"))?;
                let tokens = self.tokens.issue_tokens_for_grant(grant.grant_id).await?;
                self.retire(auth_req_id).await;
                Ok(tokens)
            }
        }
    }

    /// Returns a snapshot of a live request.
    #[must_use]
    pub fn request(&self, auth_req_id: &str) -> Option<CibaRequest> {
        self.lock().get(auth_req_id).cloned()
    }

    async fn record_delivery(&self, auth_req_id: &str, state: DeliveryState) {
        let snapshot = {
            let mut requests = self.lock();
            let Some(request) = requests.get_mut(auth_req_id) else {
                return;
            };
            request.delivery = state;
            request.clone()
        };
        self.write_through(&snapshot).await;
    }
}
