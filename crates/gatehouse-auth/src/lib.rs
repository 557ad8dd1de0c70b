//! # gatehouse-auth
//!
//! OAuth2/OIDC grant lifecycle engine for the Gatehouse authorization
//! server.
//!
//! This crate provides:
//! - Grant and token model with monotonic validity
//! - Concurrency-safe grant registry with write-through persistence
//! - Token issuance and validation (access, refresh, ID tokens)
//! - Client-initiated backchannel authentication (CIBA) flows
//! - Expiring cache and expiration notificator for session cleanup
//! - Axum HTTP handlers for `/clientinfo` and `/token`
//!
//! ## Overview
//!
//! The engine owns the lifecycle of authorization grants: from the
//! single-use authorization code (or backchannel approval) through token
//! issuance, rotation, validation, and final expiration-driven cleanup.
//! Client registration and end-user authentication live outside; the
//! engine consumes registered [`types::Client`] records through the
//! [`types::ClientDirectory`] seam and persists everything durable
//! through the entry store in `gatehouse-storage`.
//!
//! ## Modules
//!
//! - [`types`] - Client metadata and the client directory seam
//! - [`grant`] - Grant/token model and the grant registry
//! - [`token`] - Token issuance, validation, and ID token signing
//! - [`ciba`] - Backchannel authentication flow controller
//! - [`cache`] - Expiring cache with spawned expiry callbacks
//! - [`notificator`] - Periodic expiration sweep
//! - [`events`] - Lifecycle event sink
//! - [`http`] - Axum handlers for the engine's endpoints
//! - [`error`] - Protocol error taxonomy

pub mod cache;
pub mod ciba;
pub mod error;
pub mod events;
pub mod grant;
pub mod http;
pub mod notificator;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use cache::{ExpiringCache, ExpiryListener};
pub use ciba::{
    BackchannelAuthResponse, BackchannelParams, CibaFlowController, CibaNotifier, CibaOutcome,
    CibaRequest, CibaStatus, CibaValidator, DeliveryState, HttpCallbackTransport,
    HttpUriListFetcher,
};
pub use error::{AuthError, AuthResult, ErrorBody};
pub use events::{DynEventSink, EventSink, TracingEventSink};
pub use grant::{AccessToken, Grant, GrantRegistry, IdToken, RefreshToken, TokenData};
pub use http::{HttpState, router};
pub use notificator::{ExpId, ExpirationListener, ExpirationNotificator};
pub use token::{IssuedTokens, TokenService};
pub use types::{Client, ClientDirectory, DeliveryMode, DynClientDirectory, GrantType};
