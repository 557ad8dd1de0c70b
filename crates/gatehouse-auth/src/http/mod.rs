//! HTTP surface: `/clientinfo` and `/token`.

mod clientinfo;
mod token;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::ciba::CibaFlowController;
use crate::token::TokenService;

pub use clientinfo::ClientInfoClaims;
pub use token::TokenRequest;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Token issuance and validation engine.
    pub tokens: Arc<TokenService>,
    /// Backchannel flow controller.
    pub ciba: Arc<CibaFlowController>,
    /// Whether `/clientinfo` answers at all.
    pub clientinfo_enabled: bool,
}

/// Builds the engine's router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route(
            "/clientinfo",
            get(clientinfo::clientinfo_get).post(clientinfo::clientinfo_post),
        )
        .route("/token", post(token::token_endpoint))
        .with_state(state)
}
