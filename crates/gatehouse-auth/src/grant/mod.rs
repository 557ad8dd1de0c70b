//! Grant and token model plus the concurrency-safe grant registry.

mod model;
mod registry;
mod token;

pub use model::{AuthorizationCode, Grant};
pub use registry::{CodeConsumption, GrantRegistry, TokenInsert};
pub use token::{AccessToken, IdToken, RefreshToken, TokenData, TokenType, generate_token_value};
