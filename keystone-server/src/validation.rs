//! Request validation module
//!
//! Ceremony endpoints carry their identifiers in headers. Every required header must be
//! present, valid ASCII and non-empty, or the request is rejected before it reaches the
//! lifecycle.

use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::ApiError;

/// Session the ceremony is bound to
pub const SESSION_ID_HEADER: &str = "x-session-id";
/// Challenge naming the ceremony being redeemed
pub const CHALLENGE_ID_HEADER: &str = "x-challenge-id";
/// Credential an assertion ceremony is bound to
pub const CREDENTIAL_ID_HEADER: &str = "x-credential-id";

/// Upper bound on any identifier header
pub const MAX_HEADER_LEN: usize = 1024;

/// Read a required, non-empty header
pub fn required_header(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
    let value = headers
        .get(name)
        .ok_or_else(|| ApiError::bad_request(format!("Missing required header '{name}'")))?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::bad_request(format!("Header '{name}' is not valid ASCII")))?
        .trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("Header '{name}' is empty")));
    }
    if value.len() > MAX_HEADER_LEN {
        return Err(ApiError::bad_request(format!(
            "Header '{name}' exceeds {MAX_HEADER_LEN} bytes"
        )));
    }
    Ok(value.to_string())
}

/// Unwrap a JSON body, reporting malformed payloads in the API error format
pub fn json_body(
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<serde_json::Value, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::bad_request(format!(
            "Invalid JSON body: {}",
            rejection.body_text()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_required_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static(" s1 "));
        assert_eq!(required_header(&headers, SESSION_ID_HEADER).unwrap(), "s1");
    }

    #[test]
    fn test_missing_and_empty_headers_are_rejected() {
        let mut headers = HeaderMap::new();
        let err = required_header(&headers, SESSION_ID_HEADER).unwrap_err();
        assert!(err.to_string().contains("Missing"));

        headers.insert(SESSION_ID_HEADER, HeaderValue::from_static("   "));
        let err = required_header(&headers, SESSION_ID_HEADER).unwrap_err();
        assert!(err.to_string().contains("empty"));
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(MAX_HEADER_LEN + 1);
        headers.insert(CHALLENGE_ID_HEADER, HeaderValue::from_str(&long).unwrap());
        assert!(required_header(&headers, CHALLENGE_ID_HEADER).is_err());
    }
}
