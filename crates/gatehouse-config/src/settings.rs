//! Configuration sections and loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Token issuance settings.
    pub tokens: TokenConfig,
    /// CIBA backchannel settings.
    pub ciba: CibaConfig,
    /// Expiration notificator settings.
    pub notificator: NotificatorConfig,
    /// Expiring cache settings.
    pub cache: CacheConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Issuer URL advertised in ID tokens.
    pub issuer: String,
    /// Whether the `/clientinfo` endpoint is served.
    pub clientinfo_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8086,
            issuer: "http://127.0.0.1:8086".to_string(),
            clientinfo_enabled: true,
        }
    }
}

/// Token issuance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// Default access token lifetime (per-client overrides win).
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
    /// Default refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,
    /// When enabled, issuing a refresh token revokes the previous one in
    /// the same operation.
    pub rotate_refresh_tokens: bool,
    /// HMAC key for ID token signing. Must be non-empty in production.
    pub signing_key: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(86400),
            id_token_lifetime: Duration::from_secs(3600),
            authorization_code_lifetime: Duration::from_secs(600),
            rotate_refresh_tokens: true,
            signing_key: "dev-only-insecure-key".to_string(),
        }
    }
}

/// CIBA backchannel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CibaConfig {
    /// Whether the CIBA grant type is enabled server-wide.
    pub enabled: bool,
    /// Delivery modes the server advertises ("poll", "ping", "push").
    pub supported_delivery_modes: Vec<String>,
    /// Default lifetime of a backchannel authentication request.
    #[serde(with = "humantime_serde")]
    pub default_request_lifetime: Duration,
    /// Upper clamp for client-requested expiry.
    #[serde(with = "humantime_serde")]
    pub max_requested_expiry: Duration,
    /// Poll interval hint returned to poll-mode clients, in seconds.
    pub poll_interval_secs: u64,
    /// Connect/read timeout for outbound ping/push callbacks.
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
}

impl Default for CibaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            supported_delivery_modes: vec![
                "poll".to_string(),
                "ping".to_string(),
                "push".to_string(),
            ],
            default_request_lifetime: Duration::from_secs(600),
            max_requested_expiry: Duration::from_secs(3600),
            poll_interval_secs: 5,
            callback_timeout: Duration::from_secs(5),
        }
    }
}

/// Expiration notificator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificatorConfig {
    /// Minimum seconds between sweeps. A negative value disables the
    /// notificator entirely.
    pub interval_secs: i64,
    /// Look-ahead window: sessions expiring within this many seconds of
    /// "now" are loaded into the expiring cache.
    pub look_ahead_secs: u64,
}

impl Default for NotificatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            look_ahead_secs: 120,
        }
    }
}

/// Expiring cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of tracked entries. The limit throttles intake; it
    /// never evicts live tracked entries.
    pub max_size: usize,
    /// Sweep tick of the cache's own timer loop, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            sweep_interval_ms: 250,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "gatehouse_auth=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a value is out of range or the
    /// sections are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.signing_key.is_empty() {
            return Err(ConfigError::invalid("tokens.signing_key must not be empty"));
        }
        if self.tokens.access_token_lifetime.is_zero() {
            return Err(ConfigError::invalid(
                "tokens.access_token_lifetime must be positive",
            ));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size must be positive"));
        }
        if self.cache.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "cache.sweep_interval_ms must be positive",
            ));
        }
        for mode in &self.ciba.supported_delivery_modes {
            if !matches!(mode.as_str(), "poll" | "ping" | "push") {
                return Err(ConfigError::invalid(format!(
                    "ciba.supported_delivery_modes contains unknown mode '{mode}'"
                )));
            }
        }
        Ok(())
    }
}

/// Loads configuration from an optional TOML file.
///
/// With `None`, returns the validated defaults. With a path, the file is
/// parsed with defaults filled in for absent fields.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when the
/// resulting configuration fails validation.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config = match path {
        None => AppConfig::default(),
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        }
    };
    config.validate()?;
    Ok(config)
}
