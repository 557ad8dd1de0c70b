//! Authorization error types.
//!
//! One error enum covers the whole protocol taxonomy: validation failures
//! returned synchronously to callers, CIBA outcomes delivered over the push
//! channel, and operational failures from the backing store. Validation
//! kinds are expected outcomes of normal protocol operation and are logged
//! at debug level only; operational kinds are logged with full context.

use std::fmt;

use gatehouse_storage::StorageError;

/// Convenience alias for fallible engine operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur during grant and token operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is malformed or missing a required parameter.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The authorization grant, code, or refresh token is invalid, expired,
    /// consumed, or bound to another client.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The presented access token is unknown, expired, or revoked.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The requested scope exceeds what the grant allows.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The client is not authorized for the requested grant type or
    /// delivery mode.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is unauthorized.
        message: String,
    },

    /// Client metadata failed validation (missing JWKS, endpoint absent
    /// from the sector identifier document, unreachable sector URI).
    #[error("Invalid client metadata: {message}")]
    InvalidClientMetadata {
        /// Description of the metadata problem.
        message: String,
    },

    /// The grant type is not supported by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The end user denied the backchannel authentication request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of the denial.
        message: String,
    },

    /// The backchannel authentication request expired before consent.
    #[error("Expired token: {message}")]
    ExpiredToken {
        /// Description of the expiry.
        message: String,
    },

    /// The backchannel transaction failed for a reason other than denial
    /// or expiry.
    #[error("Transaction failed: {message}")]
    TransactionFailed {
        /// Description of the failure.
        message: String,
    },

    /// The backing entry store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClientMetadata` error.
    #[must_use]
    pub fn invalid_client_metadata(message: impl Into<String>) -> Self {
        Self::InvalidClientMetadata {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `ExpiredToken` error.
    #[must_use]
    pub fn expired_token(message: impl Into<String>) -> Self {
        Self::ExpiredToken {
            message: message.into(),
        }
    }

    /// Creates a new `TransactionFailed` error.
    #[must_use]
    pub fn transaction_failed(message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for expected protocol outcomes that should be logged
    /// at debug level, never as errors.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidGrant { .. }
                | Self::InvalidToken { .. }
                | Self::InvalidScope { .. }
                | Self::UnauthorizedClient { .. }
                | Self::InvalidClientMetadata { .. }
                | Self::UnsupportedGrantType { .. }
        )
    }

    /// Returns `true` for CIBA outcomes delivered via the push-error
    /// channel rather than a synchronous HTTP response.
    #[must_use]
    pub fn is_ciba_outcome(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. } | Self::ExpiredToken { .. } | Self::TransactionFailed { .. }
        )
    }

    /// Returns `true` for operational failures that warrant full-context
    /// logging.
    #[must_use]
    pub fn is_operational_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns the OAuth 2.0 wire error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidToken { .. } => "invalid_token",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::InvalidClientMetadata { .. } => "invalid_client_metadata",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::AccessDenied { .. } => "access_denied",
            Self::ExpiredToken { .. } => "expired_token",
            Self::TransactionFailed { .. } => "transaction_failed",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }

    /// Returns the HTTP status code for a synchronous response carrying
    /// this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        if self.is_validation_error() {
            400
        } else if self.is_ciba_outcome() {
            // CIBA outcomes reaching a synchronous caller (poll-mode token
            // requests) are still 400-class per RFC 8628 conventions.
            400
        } else {
            500
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        Self::storage(err.to_string())
    }
}

/// Structured JSON error body per OAuth2 error-response conventions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    /// OAuth 2.0 error code.
    pub error: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl ErrorBody {
    /// Builds a wire error body from an error, never exposing internal
    /// details for operational failures.
    #[must_use]
    pub fn from_error(err: &AuthError) -> Self {
        let description = if err.is_operational_error() {
            None
        } else {
            Some(err.to_string())
        };
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: description,
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(desc) => write!(f, "{}: {}", self.error, desc),
            None => write!(f, "{}", self.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_grant("authorization code expired");
        assert_eq!(err.to_string(), "Invalid grant: authorization code expired");

        let err = AuthError::unsupported_grant_type("device_code");
        assert_eq!(err.to_string(), "Unsupported grant type: device_code");
    }

    #[test]
    fn test_error_classification() {
        assert!(AuthError::invalid_token("x").is_validation_error());
        assert!(!AuthError::invalid_token("x").is_operational_error());

        assert!(AuthError::access_denied("x").is_ciba_outcome());
        assert!(!AuthError::access_denied("x").is_validation_error());

        assert!(AuthError::storage("down").is_operational_error());
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            AuthError::invalid_token("x").oauth_error_code(),
            "invalid_token"
        );
        assert_eq!(
            AuthError::invalid_client_metadata("x").oauth_error_code(),
            "invalid_client_metadata"
        );
        assert_eq!(AuthError::storage("x").oauth_error_code(), "server_error");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(AuthError::invalid_request("x").http_status(), 400);
        assert_eq!(AuthError::invalid_grant("x").http_status(), 400);
        assert_eq!(AuthError::storage("x").http_status(), 500);
    }

    #[test]
    fn test_error_body_hides_internal_details() {
        let body = ErrorBody::from_error(&AuthError::storage("dsn=secret://"));
        assert_eq!(body.error, "server_error");
        assert!(body.error_description.is_none());

        let body = ErrorBody::from_error(&AuthError::invalid_token("unknown token"));
        assert_eq!(body.error, "invalid_token");
        assert!(body.error_description.is_some());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: AuthError = StorageError::backend("connection refused").into();
        assert!(matches!(err, AuthError::Storage { .. }));
    }
}
