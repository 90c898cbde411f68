//! Client-facing auth: a single configured proxy key, compared in constant
//! time, accepted as either `x-api-key` or `Authorization: Bearer`.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::error::ProxyError;

/// Checks the inbound request's key against `expected`. No key configured
/// means the proxy accepts any caller.
pub fn authenticate(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ProxyError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let presented = extract_key(headers)
        .ok_or_else(|| ProxyError::unauthorized("missing x-api-key or authorization header"))?;

    if keys_match(expected, &presented) {
        Ok(())
    } else {
        Err(ProxyError::forbidden("invalid api key"))
    }
}

fn keys_match(expected: &str, presented: &str) -> bool {
    // Constant-time over the shorter of the two lengths avoids leaking
    // length via comparison time, but length itself isn't secret to hide
    // further since a mismatch there always fails below.
    expected.len() == presented.len() && expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn extract_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_str(headers, "x-api-key") {
        return Some(value.to_string());
    }

    let auth = header_str(headers, "authorization")?;
    let trimmed = auth.trim();
    trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    #[test]
    fn no_configured_key_accepts_anyone() {
        assert!(authenticate(&HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let err = authenticate(&HeaderMap::new(), Some("secret")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn matching_x_api_key_succeeds() {
        let headers = headers_with("x-api-key", "secret");
        assert!(authenticate(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn matching_bearer_succeeds() {
        let headers = headers_with("authorization", "Bearer secret");
        assert!(authenticate(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn mismatched_key_is_forbidden() {
        let headers = headers_with("x-api-key", "wrong");
        let err = authenticate(&headers, Some("secret")).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Forbidden);
    }
}
