use crate::errors::ProxyError;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use workloads::API_KEY_HEADER;

const BEARER_PREFIX: &str = "Bearer ";

/// Returns the tenant credential, taken from `X-C3-API-KEY` or else from an
/// `Authorization: Bearer` header.
pub fn extract_api_key(headers: &HeaderMap) -> Result<String, ProxyError> {
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|key| !key.is_empty());

    let from_bearer = || {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(BEARER_PREFIX))
            .filter(|key| !key.is_empty())
    };

    from_header
        .or_else(from_bearer)
        .map(str::to_string)
        .ok_or(ProxyError::MissingApiKey)
}
