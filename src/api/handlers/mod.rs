pub mod auth;
pub mod health;
pub use self::health::health;

// common functions for the handlers
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::debug;

use crate::crypto::{Claims, JwtIssuer, Lifetime};
use crate::Error;

#[derive(Serialize, Debug)]
pub struct Message {
    message: String,
}

pub(crate) fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Message {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Response for a handler error. The handler already logged it.
pub(crate) fn failure(err: &Error, what: &str) -> Response {
    if err.is_cancelled() {
        debug!("{} cancelled", what);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    message(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("{what} failed. Please try again later."),
    )
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Claims of the caller's access token, or `401` when it is missing or invalid.
pub(crate) fn bearer_claims(
    headers: &HeaderMap,
    issuer: &JwtIssuer,
    lifetime: Lifetime,
) -> Result<Claims, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        debug!("missing bearer token");
        return Err(StatusCode::UNAUTHORIZED.into_response());
    };
    issuer.decode(&token, lifetime).map_err(|err| {
        debug!("Rejected bearer token: {}", err);
        StatusCode::UNAUTHORIZED.into_response()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(
            extract_bearer_token(&headers("Bearer abc.def")),
            Some("abc.def".to_string())
        );
        assert_eq!(
            extract_bearer_token(&headers("bearer  abc ")),
            Some("abc".to_string())
        );
        assert_eq!(extract_bearer_token(&headers("Basic abc")), None);
        assert_eq!(extract_bearer_token(&headers("Bearer ")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cancellation_is_not_a_server_error() {
        assert_eq!(
            failure(&Error::Cancelled, "Login").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            failure(&Error::InvalidState("empty".to_string()), "Login").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
