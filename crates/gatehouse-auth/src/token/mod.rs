//! Token issuance and validation.

mod bearer;
mod claims;
mod service;

pub use bearer::bearer_token;
pub use claims::{IdTokenClaims, sign_id_token, verify_id_token};
pub use service::{IssuedTokens, TokenService};
