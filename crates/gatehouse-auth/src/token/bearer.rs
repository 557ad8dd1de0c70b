//! RFC 6750 bearer token extraction.

/// Extracts the token from an `Authorization` header value.
///
/// The scheme comparison is case-insensitive ("Bearer", "bearer",
/// "BEARER" all match), exactly one space separates scheme and token, and
/// an empty token is rejected.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    if token.is_empty() || token.starts_with(' ') {
        return None;
    }
    Some(token)
}
