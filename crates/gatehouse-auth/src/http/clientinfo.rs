//! `/clientinfo` endpoint.
//!
//! Returns the claims bound to a valid access token. The token arrives as
//! a query parameter (GET), a form field (POST), or an
//! `Authorization: Bearer` header; the explicit parameter wins when both
//! are present.

use axum::Json;
use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, ErrorBody};
use crate::http::HttpState;
use crate::token::bearer_token;

/// Claims returned for a valid access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfoClaims {
    /// Subject the token was issued for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Owning client.
    pub client_id: String,
    /// Space-separated token scopes.
    pub scope: String,
    /// When the end user authenticated, seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// How the owning grant was established.
    pub grant_type: String,
}

/// Token-bearing parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ClientInfoParams {
    /// The access token under inspection.
    pub access_token: Option<String>,
}

/// GET handler: token via query parameter or bearer header.
pub async fn clientinfo_get(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Query(params): Query<ClientInfoParams>,
) -> Response {
    respond(&state, &headers, params.access_token)
}

/// POST handler: token via form field or bearer header. The form body is
/// optional, so a rejected extraction falls through to the header.
pub async fn clientinfo_post(
    State(state): State<HttpState>,
    headers: HeaderMap,
    params: Result<axum::Form<ClientInfoParams>, FormRejection>,
) -> Response {
    let token = params.ok().and_then(|axum::Form(p)| p.access_token);
    respond(&state, &headers, token)
}

fn respond(state: &HttpState, headers: &HeaderMap, param: Option<String>) -> Response {
    match lookup(state, headers, param) {
        Ok(claims) => (StatusCode::OK, Json(claims)).into_response(),
        Err(err) => {
            debug!(error = %err, "clientinfo request rejected");
            error_response(&err)
        }
    }
}

fn lookup(
    state: &HttpState,
    headers: &HeaderMap,
    param: Option<String>,
) -> Result<ClientInfoClaims, AuthError> {
    if !state.clientinfo_enabled {
        return Err(AuthError::invalid_token("the clientinfo endpoint is disabled"));
    }

    let value = match param {
        Some(token) if !token.is_empty() => token,
        _ => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_string)
            .ok_or_else(|| AuthError::invalid_request("access_token is missing"))?,
    };

    let (grant, token) = state.tokens.validate_access_token(&value)?;
    Ok(ClientInfoClaims {
        sub: grant.subject.clone(),
        client_id: grant.client_id.clone(),
        scope: token.scope_string(),
        auth_time: grant.auth_time.map(time::OffsetDateTime::unix_timestamp),
        grant_type: grant.grant_type.to_string(),
    })
}

fn error_response(err: &AuthError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorBody::from_error(err))).into_response()
}
