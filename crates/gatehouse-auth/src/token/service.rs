//! Token issuance and validation engine.
//!
//! The service sits between the HTTP surface and the grant registry: it
//! enforces client policy (grant types, scopes, lifetimes, rotation),
//! mints token material, and maps every failure to the protocol error
//! taxonomy. All state lives in the registry; the service itself is
//! stateless and freely shared.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use gatehouse_config::TokenConfig;

use crate::error::{AuthError, AuthResult};
use crate::grant::{
    AccessToken, CodeConsumption, Grant, GrantRegistry, IdToken, RefreshToken, TokenInsert,
    generate_token_value,
};
use crate::token::bearer::bearer_token;
use crate::token::claims::{IdTokenClaims, sign_id_token};
use crate::types::{Client, DynClientDirectory, GrantType};

/// Bounded retries for value-collision regeneration. Collisions on
/// 256-bit values mean a broken RNG, not bad luck.
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Wire-shaped token response (RFC 6749 section 5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedTokens {
    /// Opaque bearer access token.
    pub access_token: String,
    /// Always "Bearer".
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Plaintext refresh token, present when issued or rotated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Serialized ID token JWT, present when `openid` was granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Space-separated granted scopes.
    pub scope: String,
}

/// Token issuance and validation engine.
pub struct TokenService {
    registry: Arc<GrantRegistry>,
    clients: DynClientDirectory,
    config: TokenConfig,
    issuer: String,
}

impl TokenService {
    /// Creates a new token service.
    #[must_use]
    pub fn new(
        registry: Arc<GrantRegistry>,
        clients: DynClientDirectory,
        config: TokenConfig,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            clients,
            config,
            issuer: issuer.into(),
        }
    }

    /// Returns the grant registry the service issues into.
    #[must_use]
    pub fn registry(&self) -> &Arc<GrantRegistry> {
        &self.registry
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

    fn refresh_allowed(client: &Client) -> bool {
        client.allow_refresh_tokens && client.is_grant_type_allowed(GrantType::RefreshToken)
    }

    /// Issues an access token under the grant.
    ///
    /// The requested scopes must be a subset of the grant's scopes. The
    /// lifetime is the client override when registered, the configured
    /// default otherwise. Value collisions regenerate rather than
    /// overwrite.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown grant, `InvalidScope` for scope
    /// excess, `Internal` if generation keeps colliding.
    pub async fn issue_access_token(
        &self,
        grant_id: Uuid,
        scopes: Vec<String>,
    ) -> AuthResult<AccessToken> {
        let grant = self
            .registry
            .grant(grant_id)
            .ok_or_else(|| AuthError::invalid_grant("unknown grant"))?;
        if !grant.scopes_allow(&scopes) {
            return Err(AuthError::invalid_scope(
                "requested scopes exceed the grant",
            ));
        }

        let client = self.require_client(&grant.client_id).await?;
        let lifetime = client
            .access_token_lifetime
            .unwrap_or(self.config.access_token_lifetime);

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let token = AccessToken::new(generate_token_value(), lifetime, scopes.clone());
            match self
                .registry
                .insert_access_token(grant_id, token.clone())
                .await
            {
                TokenInsert::Inserted => return Ok(token),
                TokenInsert::Collision => {
                    debug!(grant_id = %grant_id, "access token value collision, regenerating");
                }
                TokenInsert::GrantNotFound => {
                    return Err(AuthError::invalid_grant("unknown grant"));
                }
            }
        }
        Err(AuthError::internal("access token generation kept colliding"))
    }

    /// Issues a refresh token under the grant, returning the plaintext.
    ///
    /// When `rotated_from` names the hash of a prior token, that token is
    /// revoked in the same registry operation that activates the new one.
    ///
    /// # Errors
    ///
    /// `UnauthorizedClient` when the client may not hold refresh tokens,
    /// `InvalidGrant` for an unknown grant.
    pub async fn issue_refresh_token(
        &self,
        grant_id: Uuid,
        rotated_from: Option<&str>,
    ) -> AuthResult<String> {
        let grant = self
            .registry
            .grant(grant_id)
            .ok_or_else(|| AuthError::invalid_grant("unknown grant"))?;
        let client = self.require_client(&grant.client_id).await?;
        if !Self::refresh_allowed(&client) {
            return Err(AuthError::unauthorized_client(
                "client may not hold refresh tokens",
            ));
        }

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let plaintext = generate_token_value();
            let token =
                RefreshToken::from_plaintext(&plaintext, self.config.refresh_token_lifetime);
            match self
                .registry
                .insert_refresh_token(grant_id, token, rotated_from)
                .await
            {
                TokenInsert::Inserted => return Ok(plaintext),
                TokenInsert::Collision => {
                    debug!(grant_id = %grant_id, "refresh token hash collision, regenerating");
                }
                TokenInsert::GrantNotFound => {
                    return Err(AuthError::invalid_grant("unknown grant"));
                }
            }
        }
        Err(AuthError::internal(
            "refresh token generation kept colliding",
        ))
    }

    /// Issues an ID token for the grant, returning the serialized JWT.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown or subjectless grant, `Internal` on
    /// signing failure.
    pub async fn issue_id_token(&self, grant_id: Uuid) -> AuthResult<String> {
        let grant = self
            .registry
            .grant(grant_id)
            .ok_or_else(|| AuthError::invalid_grant("unknown grant"))?;
        let claims =
            IdTokenClaims::for_grant(&grant, &self.issuer, self.config.id_token_lifetime)?;
        let jwt = sign_id_token(&claims, &self.config.signing_key)?;
        self.registry
            .insert_id_token(
                grant_id,
                IdToken::new(jwt.clone(), self.config.id_token_lifetime),
            )
            .await;
        Ok(jwt)
    }

    /// Exchanges an authorization code for tokens (RFC 6749 section 4.1.3).
    ///
    /// Consumption is single-use and linearizable; a replayed code gets
    /// `invalid_grant` and the registry has already revoked everything the
    /// grant issued. A code presented by the wrong client is burned the
    /// same way.
    ///
    /// # Errors
    ///
    /// `UnauthorizedClient` for client policy failures, `InvalidGrant` for
    /// any problem with the code itself.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
    ) -> AuthResult<IssuedTokens> {
        let client = self.require_client(client_id).await?;
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
            return Err(AuthError::unauthorized_client(
                "client is not registered for the authorization code grant",
            ));
        }

        let grant = match self.registry.consume_code(code).await {
            CodeConsumption::Consumed(grant) => grant,
            CodeConsumption::Replayed(grant) => {
                debug!(grant_id = %grant.grant_id, client_id = %client_id, "code replay rejected");
                return Err(AuthError::invalid_grant(
                    "authorization code already consumed",
                ));
            }
            CodeConsumption::Expired => {
                return Err(AuthError::invalid_grant("authorization code expired"));
            }
            CodeConsumption::NotFound => {
                return Err(AuthError::invalid_grant("unknown authorization code"));
            }
        };

        if grant.client_id != client_id {
            // The code is consumed and the grant burned; a stolen code
            // must not stay exchangeable by its rightful owner either.
            self.registry.revoke_grant_tokens(grant.grant_id).await;
            return Err(AuthError::invalid_grant(
                "authorization code issued to another client",
            ));
        }
        if grant.redirect_uri.as_deref() != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri mismatch"));
        }

        let scopes: Vec<String> = grant.scopes.iter().cloned().collect();
        self.mint(&grant, &client, scopes, None).await
    }

    /// Exchanges a refresh token for a fresh access token (RFC 6749
    /// section 6), narrowing scopes when requested and rotating the
    /// refresh token per configuration.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown, expired, revoked, or foreign token;
    /// `InvalidScope` when the narrowed scopes exceed the grant.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        requested_scopes: Option<Vec<String>>,
    ) -> AuthResult<IssuedTokens> {
        let client = self.require_client(client_id).await?;
        if !Self::refresh_allowed(&client) {
            return Err(AuthError::unauthorized_client(
                "client is not registered for the refresh token grant",
            ));
        }

        let grant = self
            .registry
            .grant_by_refresh_token(refresh_token)
            .ok_or_else(|| AuthError::invalid_grant("unknown refresh token"))?;
        let hash = RefreshToken::hash(refresh_token);
        let presented = grant
            .refresh_token_by_hash(&hash)
            .ok_or_else(|| AuthError::invalid_grant("unknown refresh token"))?;
        if !presented.is_valid() {
            return Err(AuthError::invalid_grant(
                "refresh token expired or revoked",
            ));
        }
        if grant.client_id != client_id {
            return Err(AuthError::invalid_grant(
                "refresh token issued to another client",
            ));
        }

        let scopes = match requested_scopes {
            Some(scopes) => {
                if !grant.scopes_allow(&scopes) {
                    return Err(AuthError::invalid_scope(
                        "requested scopes exceed the grant",
                    ));
                }
                scopes
            }
            None => grant.scopes.iter().cloned().collect(),
        };

        let rotated_from = self.config.rotate_refresh_tokens.then_some(hash.as_str());
        self.mint(&grant, &client, scopes, rotated_from).await
    }

    /// Mints the response token set for a grant: access token always, a
    /// refresh token when client policy allows, an ID token when `openid`
    /// was granted.
    async fn mint(
        &self,
        grant: &Grant,
        client: &Client,
        scopes: Vec<String>,
        rotated_from: Option<&str>,
    ) -> AuthResult<IssuedTokens> {
        let access = self.issue_access_token(grant.grant_id, scopes.clone()).await?;

        let refresh_token = if Self::refresh_allowed(client) {
            Some(
                self.issue_refresh_token(grant.grant_id, rotated_from)
                    .await?,
            )
        } else {
            None
        };

        let id_token = if scopes.iter().any(|s| s == "openid") {
            Some(self.issue_id_token(grant.grant_id).await?)
        } else {
            None
        };

        debug!(
            grant_id = %grant.grant_id,
            client_id = %grant.client_id,
            grant_type = %grant.grant_type,
            "tokens issued"
        );
        Ok(IssuedTokens {
            access_token: access.data.value.clone(),
            token_type: "Bearer".to_string(),
            expires_in: access.data.expires_in(),
            refresh_token,
            id_token,
            scope: access.scope_string(),
        })
    }

    /// Issues the full token set for an existing grant with the grant's
    /// own scopes. Used by the backchannel flows once the user approves.
    ///
    /// # Errors
    ///
    /// `InvalidGrant` for an unknown grant, plus any issuance error.
    pub async fn issue_tokens_for_grant(&self, grant_id: Uuid) -> AuthResult<IssuedTokens> {
        let grant = self
            .registry
            .grant(grant_id)
            .ok_or_else(|| AuthError::invalid_grant("unknown grant"))?;
        let client = self.require_client(&grant.client_id).await?;
        let scopes: Vec<String> = grant.scopes.iter().cloned().collect();
        self.mint(&grant, &client, scopes, None).await
    }

    /// Validates an opaque access token and returns the owning grant with
    /// the token record.
    ///
    /// # Errors
    ///
    /// `InvalidToken` when the token is unknown, expired, or revoked.
    pub fn validate_access_token(&self, value: &str) -> AuthResult<(Grant, AccessToken)> {
        let grant = self
            .registry
            .grant_by_access_token(value)
            .ok_or_else(|| AuthError::invalid_token("unknown access token"))?;
        let token = grant
            .access_token(value)
            .ok_or_else(|| AuthError::invalid_token("unknown access token"))?
            .clone();
        if !token.is_valid() {
            return Err(AuthError::invalid_token("token expired or revoked"));
        }
        Ok((grant, token))
    }

    /// Validates a bearer credential from an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for a malformed header or an invalid token.
    pub fn validate_bearer_header(&self, header: &str) -> AuthResult<(Grant, AccessToken)> {
        let value = bearer_token(header)
            .ok_or_else(|| AuthError::invalid_token("malformed bearer credentials"))?;
        self.validate_access_token(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InMemoryClientDirectory;
    use gatehouse_storage::InMemoryEntryStore;
    use std::collections::BTreeSet;
    use std::time::Duration;

    async fn service_with(client: Client) -> TokenService {
        let registry = Arc::new(GrantRegistry::new(Arc::new(InMemoryEntryStore::new())));
        let directory = InMemoryClientDirectory::new();
        directory.insert(client).await;
        TokenService::new(
            registry,
            Arc::new(directory),
            TokenConfig::default(),
            "https://op.example.com",
        )
    }

    fn code_client() -> Client {
        let mut client = Client::new("app-1", "Test App");
        client.redirect_uris = vec!["https://app.example.com/cb".to_string()];
        client
    }

    async fn seeded_grant(service: &TokenService) -> Grant {
        let scopes: BTreeSet<String> = ["openid".to_string(), "profile".to_string()].into();
        let grant = Grant::new(
            "app-1",
            GrantType::AuthorizationCode,
            Some("user-1".to_string()),
            scopes,
        )
        .with_code(Duration::from_secs(600))
        .with_redirect_uri("https://app.example.com/cb")
        .with_nonce("n-1");
        service.registry().create_grant(grant.clone()).await.unwrap();
        grant
    }

    #[tokio::test]
    async fn test_code_exchange_happy_path() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let tokens = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await
            .unwrap();

        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.scope, "openid profile");
        assert!(tokens.expires_in > 0);
        assert!(tokens.refresh_token.is_some());
        assert!(tokens.id_token.is_some());

        let (found, token) = service.validate_access_token(&tokens.access_token).unwrap();
        assert_eq!(found.grant_id, grant.grant_id);
        assert!(token.is_valid());
    }

    #[tokio::test]
    async fn test_code_replay_revokes_issued_tokens() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let tokens = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await
            .unwrap();
        assert!(service.validate_access_token(&tokens.access_token).is_ok());

        let replay = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await;
        assert!(matches!(replay, Err(AuthError::InvalidGrant { .. })));

        // The first exchange's tokens are dead too.
        assert!(matches!(
            service.validate_access_token(&tokens.access_token),
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            service
                .refresh_access_token(&tokens.refresh_token.unwrap(), "app-1", None)
                .await,
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match_exactly() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let result = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb/"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_foreign_client_burns_the_code() {
        let service = service_with(code_client()).await;
        let registry = Arc::clone(service.registry());
        let directory = InMemoryClientDirectory::new();
        directory.insert(code_client()).await;
        directory.insert(Client::new("app-2", "Other App")).await;
        let service = TokenService::new(
            registry,
            Arc::new(directory),
            TokenConfig::default(),
            "https://op.example.com",
        );
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let result = service
            .exchange_authorization_code(&code, "app-2", Some("https://app.example.com/cb"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));

        // Once burned, the rightful owner cannot exchange it either.
        let result = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }

    #[tokio::test]
    async fn test_refresh_rotation_kills_the_old_token() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let tokens = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await
            .unwrap();
        let old_refresh = tokens.refresh_token.unwrap();

        let refreshed = service
            .refresh_access_token(&old_refresh, "app-1", None)
            .await
            .unwrap();
        let new_refresh = refreshed.refresh_token.clone().unwrap();
        assert_ne!(new_refresh, old_refresh);

        // The rotated-out token no longer works; the new one does.
        assert!(matches!(
            service.refresh_access_token(&old_refresh, "app-1", None).await,
            Err(AuthError::InvalidGrant { .. })
        ));
        assert!(
            service
                .refresh_access_token(&new_refresh, "app-1", None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_refresh_scope_narrowing() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();
        let tokens = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await
            .unwrap();
        let refresh = tokens.refresh_token.unwrap();

        let narrowed = service
            .refresh_access_token(&refresh, "app-1", Some(vec!["profile".to_string()]))
            .await
            .unwrap();
        assert_eq!(narrowed.scope, "profile");
        assert!(narrowed.id_token.is_none());

        let excess = service
            .refresh_access_token(
                narrowed.refresh_token.as_ref().unwrap(),
                "app-1",
                Some(vec!["admin".to_string()]),
            )
            .await;
        assert!(matches!(excess, Err(AuthError::InvalidScope { .. })));
    }

    #[tokio::test]
    async fn test_no_refresh_token_for_disallowed_client() {
        let mut client = code_client();
        client.allow_refresh_tokens = false;
        let service = service_with(client).await;
        let grant = seeded_grant(&service).await;
        let code = grant.code.as_ref().unwrap().value.clone();

        let tokens = service
            .exchange_authorization_code(&code, "app-1", Some("https://app.example.com/cb"))
            .await
            .unwrap();
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_scope_excess_rejected_at_issuance() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;

        let result = service
            .issue_access_token(grant.grant_id, vec!["admin".to_string()])
            .await;
        assert!(matches!(result, Err(AuthError::InvalidScope { .. })));
    }

    #[tokio::test]
    async fn test_validate_bearer_header() {
        let service = service_with(code_client()).await;
        let grant = seeded_grant(&service).await;
        let token = service
            .issue_access_token(grant.grant_id, vec!["openid".to_string()])
            .await
            .unwrap();

        let header = format!("Bearer {}", token.data.value);
        assert!(service.validate_bearer_header(&header).is_ok());
        assert!(matches!(
            service.validate_bearer_header("Basic abc"),
            Err(AuthError::InvalidToken { .. })
        ));
        assert!(matches!(
            service.validate_bearer_header("Bearer nope"),
            Err(AuthError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_client_rejected() {
        let service = service_with(code_client()).await;
        let result = service
            .exchange_authorization_code("whatever", "ghost", None)
            .await;
        assert!(matches!(result, Err(AuthError::UnauthorizedClient { .. })));
    }
}
