//! # gatehouse-config
//!
//! Typed configuration for the Gatehouse authorization server.
//!
//! Configuration is a TOML file mapped onto [`AppConfig`]. Every field has
//! a production-sensible default, so an empty file (or no file at all) gives
//! a runnable server; a partial file overrides only what it names.
//!
//! ## Sections
//!
//! - `[server]` - bind address and port
//! - `[tokens]` - lifetimes, refresh rotation, ID token signing
//! - `[ciba]` - backchannel authentication settings
//! - `[notificator]` - expiration sweep interval and look-ahead window
//! - `[cache]` - expiring cache bounds
//! - `[logging]` - log level filter
//!
//! ## Example
//!
//! ```toml
//! [server]
//! port = 8086
//!
//! [tokens]
//! access_token_lifetime = "1h"
//! rotate_refresh_tokens = true
//!
//! [notificator]
//! interval_secs = 60
//! ```

mod error;
mod settings;

pub use error::ConfigError;
pub use settings::{
    AppConfig, CacheConfig, CibaConfig, LoggingConfig, NotificatorConfig, ServerConfig,
    TokenConfig, load_config,
};
