//! ID token claims and signing.
//!
//! ID tokens are HS256 JWTs over the configured signing key. The claim set
//! is the OIDC core minimum plus `auth_time` and `nonce` when the grant
//! carries them.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::grant::Grant;

/// OpenID Connect ID token claim set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer URL.
    pub iss: String,
    /// Subject identifier.
    pub sub: String,
    /// Audience (the client id).
    pub aud: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiration, seconds since the epoch.
    pub exp: i64,
    /// When the end user authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    /// Builds the claim set for a grant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGrant` if the grant has no subject.
    pub fn for_grant(
        grant: &Grant,
        issuer: &str,
        lifetime: std::time::Duration,
    ) -> Result<Self, AuthError> {
        let subject = grant
            .subject
            .as_deref()
            .ok_or_else(|| AuthError::invalid_grant("grant has no subject for an ID token"))?;
        let now = OffsetDateTime::now_utc();
        Ok(Self {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            aud: grant.client_id.clone(),
            iat: now.unix_timestamp(),
            exp: (now + lifetime).unix_timestamp(),
            auth_time: grant.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: grant.nonce.clone(),
        })
    }
}

/// Signs the claim set into a serialized JWT.
///
/// # Errors
///
/// Returns an internal error if encoding fails.
pub fn sign_id_token(claims: &IdTokenClaims, signing_key: &str) -> Result<String, AuthError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(signing_key.as_bytes()),
    )
    .map_err(|e| AuthError::internal(format!("ID token signing failed: {e}")))
}

/// Verifies a serialized ID token and returns its claims.
///
/// # Errors
///
/// Returns `InvalidToken` if the signature or expiry check fails.
pub fn verify_id_token(jwt: &str, signing_key: &str) -> Result<IdTokenClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    decode::<IdTokenClaims>(
        jwt,
        &DecodingKey::from_secret(signing_key.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| AuthError::invalid_token(format!("ID token verification failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GrantType;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn grant() -> Grant {
        let scopes: BTreeSet<String> = ["openid".to_string()].into();
        Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes,
        )
        .with_nonce("n-1")
        .with_auth_time(OffsetDateTime::now_utc())
    }

    #[test]
    fn test_sign_and_verify() {
        let claims =
            IdTokenClaims::for_grant(&grant(), "https://op.example.com", Duration::from_secs(3600))
                .unwrap();
        let jwt = sign_id_token(&claims, "secret").unwrap();

        let back = verify_id_token(&jwt, "secret").unwrap();
        assert_eq!(back.iss, "https://op.example.com");
        assert_eq!(back.sub, "user-1");
        assert_eq!(back.aud, "app-1");
        assert_eq!(back.nonce.as_deref(), Some("n-1"));
        assert!(back.auth_time.is_some());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let claims =
            IdTokenClaims::for_grant(&grant(), "https://op.example.com", Duration::from_secs(3600))
                .unwrap();
        let jwt = sign_id_token(&claims, "secret").unwrap();
        assert!(verify_id_token(&jwt, "other-secret").is_err());
    }

    #[test]
    fn test_subjectless_grant_rejected() {
        let scopes: BTreeSet<String> = BTreeSet::new();
        let grant = Grant::new("app-1", GrantType::ClientCredentials, None, scopes);
        let result = IdTokenClaims::for_grant(&grant, "iss", Duration::from_secs(60));
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }
}
