//! Backchannel registration parameter validation.
//!
//! The checks run in a fixed order and every failure maps to
//! `invalid_client_metadata` or a more specific validation error; failures
//! here are expected protocol outcomes and are logged at debug level only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gatehouse_config::CibaConfig;

use crate::error::{AuthError, AuthResult};
use crate::types::{Client, DeliveryMode, GrantType, SubjectType};

/// Fetches a JSON array of URI strings from a sector identifier document.
///
/// A seam so validation is testable without a network; production uses
/// [`HttpUriListFetcher`].
#[async_trait]
pub trait UriListFetcher: Send + Sync {
    /// Fetches and parses the document at `uri`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidClientMetadata` when the document cannot be
    /// fetched, is not a 200, or is not a JSON array of strings.
    async fn fetch_uri_list(&self, uri: &str) -> AuthResult<Vec<String>>;
}

/// HTTP fetcher with a bounded timeout.
pub struct HttpUriListFetcher {
    client: reqwest::Client,
}

impl HttpUriListFetcher {
    /// Creates a fetcher with the given connect/read timeout.
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
impl UriListFetcher for HttpUriListFetcher {
    async fn fetch_uri_list(&self, uri: &str) -> AuthResult<Vec<String>> {
        let response = self.client.get(uri).send().await.map_err(|e| {
            AuthError::invalid_client_metadata(format!("sector identifier fetch failed: {e}"))
        })?;
        if !response.status().is_success() {
            return Err(AuthError::invalid_client_metadata(format!(
                "sector identifier fetch returned {}",
                response.status()
            )));
        }
        response.json::<Vec<String>>().await.map_err(|e| {
            AuthError::invalid_client_metadata(format!(
                "sector identifier document is not a JSON array of strings: {e}"
            ))
        })
    }
}

/// Validates a client's backchannel registration for one request.
pub struct CibaValidator {
    fetcher: Arc<dyn UriListFetcher>,
    config: CibaConfig,
}

impl CibaValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(fetcher: Arc<dyn UriListFetcher>, config: CibaConfig) -> Self {
        Self { fetcher, config }
    }

    /// Runs the backchannel checks in order.
    ///
    /// 1. The client's registered delivery mode must be one the server
    ///    advertises.
    /// 2. Ping/push require a non-blank per-request notification token and
    ///    a registered non-blank notification endpoint.
    /// 3. Poll/ping require the CIBA grant type to be enabled server-wide
    ///    and registered for the client.
    /// 4. Pairwise-subject clients need a resolvable JWKS.
    /// 5. With a `sector_identifier_uri`, the relevant endpoint (jwks_uri
    ///    for poll/ping, notification endpoint for push) must appear in
    ///    the fetched document. A fetch failure is a validation failure,
    ///    never skipped.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub async fn validate_backchannel(
        &self,
        client: &Client,
        notification_token: Option<&str>,
    ) -> AuthResult<()> {
        let result = self.run_checks(client, notification_token).await;
        if let Err(err) = &result {
            debug!(client_id = %client.client_id, error = %err, "backchannel validation failed");
        }
        result
    }

    async fn run_checks(
        &self,
        client: &Client,
        notification_token: Option<&str>,
    ) -> AuthResult<()> {
        let mode = client.backchannel_delivery_mode.ok_or_else(|| {
            AuthError::invalid_client_metadata("no backchannel delivery mode registered")
        })?;
        if !self
            .config
            .supported_delivery_modes
            .iter()
            .any(|m| m == mode.as_str())
        {
            return Err(AuthError::invalid_client_metadata(format!(
                "delivery mode '{mode}' is not supported by this server"
            )));
        }

        if mode.requires_notification_endpoint() {
            if notification_token.is_none_or(|t| t.trim().is_empty()) {
                return Err(AuthError::invalid_request(
                    "client_notification_token is required for ping and push modes",
                ));
            }
            if client
                .backchannel_notification_endpoint
                .as_deref()
                .is_none_or(|e| e.trim().is_empty())
            {
                return Err(AuthError::invalid_client_metadata(
                    "no backchannel notification endpoint registered",
                ));
            }
        }

        if matches!(mode, DeliveryMode::Poll | DeliveryMode::Ping) {
            if !self.config.enabled {
                return Err(AuthError::unsupported_grant_type(GrantType::Ciba.as_str()));
            }
            if !client.is_grant_type_allowed(GrantType::Ciba) {
                return Err(AuthError::invalid_client_metadata(
                    "client is not registered for the CIBA grant type",
                ));
            }
        }

        if client.subject_type == SubjectType::Pairwise && !client.has_resolvable_jwks() {
            return Err(AuthError::invalid_client_metadata(
                "pairwise subject type requires a resolvable JWKS",
            ));
        }

        if let Some(sector_uri) = client.sector_identifier_uri.as_deref() {
            let required = match mode {
                DeliveryMode::Poll | DeliveryMode::Ping => client.jwks_uri.as_deref(),
                DeliveryMode::Push => client.backchannel_notification_endpoint.as_deref(),
            }
            .ok_or_else(|| {
                AuthError::invalid_client_metadata(
                    "no endpoint to validate against the sector identifier document",
                )
            })?;

            let listed = self.fetcher.fetch_uri_list(sector_uri).await?;
            if !listed.iter().any(|u| u == required) {
                return Err(AuthError::invalid_client_metadata(format!(
                    "'{required}' is not listed in the sector identifier document"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedFetcher {
        result: AuthResult<Vec<String>>,
    }

    #[async_trait]
    impl UriListFetcher for FixedFetcher {
        async fn fetch_uri_list(&self, _uri: &str) -> AuthResult<Vec<String>> {
            match &self.result {
                Ok(list) => Ok(list.clone()),
                Err(_) => Err(AuthError::invalid_client_metadata("fetch failed")),
            }
        }
    }

    fn validator(fetch: AuthResult<Vec<String>>) -> CibaValidator {
        CibaValidator::new(
            Arc::new(FixedFetcher { result: fetch }),
            CibaConfig::default(),
        )
    }

    fn ciba_client(mode: DeliveryMode) -> Client {
        let mut client = Client::new("app-1", "Test App");
        client.grant_types.push(GrantType::Ciba);
        client.backchannel_delivery_mode = Some(mode);
        client.backchannel_notification_endpoint =
            Some("https://app.example.com/cb-notify".to_string());
        client
    }

    #[tokio::test]
    async fn test_poll_mode_happy_path() {
        let validator = validator(Ok(vec![]));
        let client = ciba_client(DeliveryMode::Poll);
        assert!(validator.validate_backchannel(&client, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_delivery_mode() {
        let validator = validator(Ok(vec![]));
        let mut client = ciba_client(DeliveryMode::Poll);
        client.backchannel_delivery_mode = None;
        let result = validator.validate_backchannel(&client, None).await;
        assert!(matches!(result, Err(AuthError::InvalidClientMetadata { .. })));
    }

    #[tokio::test]
    async fn test_unadvertised_mode_rejected() {
        let mut config = CibaConfig::default();
        config.supported_delivery_modes = vec!["poll".to_string()];
        let validator = CibaValidator::new(
            Arc::new(FixedFetcher { result: Ok(vec![]) }),
            config,
        );
        let client = ciba_client(DeliveryMode::Push);
        let result = validator.validate_backchannel(&client, Some("tok")).await;
        assert!(matches!(result, Err(AuthError::InvalidClientMetadata { .. })));
    }

    #[tokio::test]
    async fn test_ping_requires_notification_token_and_endpoint() {
        let validator = validator(Ok(vec![]));
        let client = ciba_client(DeliveryMode::Ping);

        assert!(matches!(
            validator.validate_backchannel(&client, None).await,
            Err(AuthError::InvalidRequest { .. })
        ));
        assert!(matches!(
            validator.validate_backchannel(&client, Some("  ")).await,
            Err(AuthError::InvalidRequest { .. })
        ));

        let mut endpointless = ciba_client(DeliveryMode::Ping);
        endpointless.backchannel_notification_endpoint = None;
        assert!(matches!(
            validator.validate_backchannel(&endpointless, Some("tok")).await,
            Err(AuthError::InvalidClientMetadata { .. })
        ));

        assert!(
            validator
                .validate_backchannel(&client, Some("tok"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_poll_requires_registered_ciba_grant() {
        let validator = validator(Ok(vec![]));
        let mut client = ciba_client(DeliveryMode::Poll);
        client.grant_types.retain(|g| *g != GrantType::Ciba);
        let result = validator.validate_backchannel(&client, None).await;
        assert!(matches!(result, Err(AuthError::InvalidClientMetadata { .. })));
    }

    #[tokio::test]
    async fn test_pairwise_needs_jwks() {
        let validator = validator(Ok(vec![]));
        let mut client = ciba_client(DeliveryMode::Poll);
        client.subject_type = SubjectType::Pairwise;
        assert!(matches!(
            validator.validate_backchannel(&client, None).await,
            Err(AuthError::InvalidClientMetadata { .. })
        ));

        client.jwks_uri = Some("https://app.example.com/jwks.json".to_string());
        assert!(validator.validate_backchannel(&client, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_sector_document_must_list_endpoint() {
        let mut client = ciba_client(DeliveryMode::Push);
        client.sector_identifier_uri = Some("https://sector.example.com/uris.json".to_string());

        // Listed endpoint passes.
        let listed = validator(Ok(vec![
            "https://app.example.com/cb-notify".to_string(),
        ]));
        assert!(
            listed
                .validate_backchannel(&client, Some("tok"))
                .await
                .is_ok()
        );

        // Absent endpoint fails.
        let unlisted = validator(Ok(vec!["https://other.example.com".to_string()]));
        assert!(matches!(
            unlisted.validate_backchannel(&client, Some("tok")).await,
            Err(AuthError::InvalidClientMetadata { .. })
        ));

        // A failed fetch is a validation failure, never skipped.
        let unreachable = validator(Err(AuthError::invalid_client_metadata("x")));
        assert!(matches!(
            unreachable.validate_backchannel(&client, Some("tok")).await,
            Err(AuthError::InvalidClientMetadata { .. })
        ));
    }
}
