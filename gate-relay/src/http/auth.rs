//! Authentication middleware.
//!
//! Runs the authorization hierarchy for every protected route and places the
//! resulting [`Principal`](gate_types::Principal) in the request extensions.

use crate::error::GatewayError;
use crate::hierarchy::Credentials;
use crate::server::Gateway;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Header naming a public key explicitly.
pub const PUBLIC_KEY_HEADER: &str = "x-public-key";

/// Header carrying a bare credential when `Authorization` is absent.
pub const TOKEN_HEADER: &str = "token";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Value of `Authorization`, with any `Bearer ` prefix removed.
pub fn authorization_value(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, AUTHORIZATION.as_str())?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value).trim())
}

/// Collect credentials from request headers.
///
/// The bearer value comes from `Authorization: Bearer <t>`, then from the
/// `token` header.
pub fn credentials_from_headers(headers: &HeaderMap) -> Credentials {
    let bearer = header_str(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .or_else(|| header_str(headers, TOKEN_HEADER));

    Credentials {
        token: bearer.map(str::to_string),
        public_key: header_str(headers, PUBLIC_KEY_HEADER).map(str::to_string),
    }
}

/// Reject requests no trust source accepts.
pub async fn require_auth(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let credentials = credentials_from_headers(request.headers());

    match gateway.hierarchy().authenticate(&credentials).await {
        Ok(principal) => {
            gateway
                .metrics()
                .auth_granted_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Authorized {} {} as {:?} ({})",
                request.method(),
                request.uri().path(),
                principal.user_id,
                principal.source
            );
            request.extensions_mut().insert(principal);
            Ok(next.run(request).await)
        }
        Err(e) => {
            gateway
                .metrics()
                .auth_denied_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Denied {} {}: {}",
                request.method(),
                request.uri().path(),
                e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_takes_precedence_over_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("def"));
        headers.insert(PUBLIC_KEY_HEADER, HeaderValue::from_static("@key.cert"));

        let creds = credentials_from_headers(&headers);
        assert_eq!(creds.token.as_deref(), Some("abc"));
        assert_eq!(creds.public_key.as_deref(), Some("@key.cert"));
    }

    #[test]
    fn token_header_is_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("def"));
        assert_eq!(
            credentials_from_headers(&headers).token.as_deref(),
            Some("def")
        );

        assert_eq!(credentials_from_headers(&HeaderMap::new()), Credentials::default());
    }

    #[test]
    fn authorization_value_accepts_raw_or_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(authorization_value(&headers), Some("s3cret"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("s3cret"));
        assert_eq!(authorization_value(&headers), Some("s3cret"));
    }
}
