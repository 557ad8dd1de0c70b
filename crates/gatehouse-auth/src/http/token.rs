//! `/token` endpoint (RFC 6749 section 3.2).

use axum::Json;
use axum::extract::{Form, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, ErrorBody};
use crate::http::HttpState;
use crate::token::IssuedTokens;
use crate::types::GrantType;

/// Form-encoded token request body.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    /// Wire grant type.
    pub grant_type: Option<String>,
    /// Requesting client.
    pub client_id: Option<String>,
    /// Authorization code (code grant).
    pub code: Option<String>,
    /// Redirect URI presented at the authorization step (code grant).
    pub redirect_uri: Option<String>,
    /// Refresh token (refresh grant).
    pub refresh_token: Option<String>,
    /// Space-separated scope narrowing (refresh grant).
    pub scope: Option<String>,
    /// Backchannel request identifier (CIBA grant).
    pub auth_req_id: Option<String>,
}

/// POST handler for the token endpoint.
pub async fn token_endpoint(
    State(state): State<HttpState>,
    Form(request): Form<TokenRequest>,
) -> Response {
    match issue(&state, request).await {
        Ok(tokens) => {
            let mut response = (StatusCode::OK, Json(tokens)).into_response();
            // Token responses must never be cached (RFC 6749 section 5.1).
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
                .headers_mut()
                .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => {
            debug!(error = %err, "token request rejected");
            let status = StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(ErrorBody::from_error(&err))).into_response()
        }
    }
}

async fn issue(state: &HttpState, request: TokenRequest) -> Result<IssuedTokens, AuthError> {
    let grant_type = request
        .grant_type
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("grant_type is missing"))?;
    let client_id = request
        .client_id
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("client_id is missing"))?;

    match GrantType::parse(grant_type) {
        Some(GrantType::AuthorizationCode) => {
            let code = request
                .code
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("code is missing"))?;
            state
                .tokens
                .exchange_authorization_code(code, client_id, request.redirect_uri.as_deref())
                .await
        }
        Some(GrantType::RefreshToken) => {
            let refresh_token = request
                .refresh_token
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("refresh_token is missing"))?;
            let scopes = request
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_string).collect());
            state
                .tokens
                .refresh_access_token(refresh_token, client_id, scopes)
                .await
        }
        Some(GrantType::Ciba) => {
            let auth_req_id = request
                .auth_req_id
                .as_deref()
                .ok_or_else(|| AuthError::invalid_request("auth_req_id is missing"))?;
            state.ciba.exchange_backchannel(auth_req_id, client_id).await
        }
        _ => Err(AuthError::unsupported_grant_type(grant_type)),
    }
}
