//! Request extractors shared by the handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::error::AggregatorError;
use crate::plugin::AUTH_TOKEN_HEADER;

/// Caller session token from the `X-Auth-Token` header.
#[derive(Debug, Clone)]
pub struct AuthToken(pub String);

impl<S> FromRequestParts<S> for AuthToken
where
    S: Send + Sync,
{
    type Rejection = AggregatorError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .ok_or(AggregatorError::InvalidToken)
    }
}

/// Parse a JSON request body, reporting failures as `MalformedJSON`.
pub fn json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AggregatorError> {
    serde_json::from_slice(body).map_err(|e| {
        AggregatorError::MalformedJson(format!("error while trying to get JSON request body: {e}"))
    })
}
