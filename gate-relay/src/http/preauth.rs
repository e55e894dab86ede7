//! Pre-authorization and token verification endpoints.

use super::auth::authorization_value;
use super::json_body;
use crate::error::GatewayError;
use crate::hierarchy::PreAuthOutcome;
use crate::server::Gateway;
use axum::{
    extract::{rejection::JsonRejection, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use gate_types::Principal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Query of `GET /pre-authorize/:pub_key`.
#[derive(Debug, Default, Deserialize)]
pub struct PreAuthorizeQuery {
    /// Bypass membership verification; requires the system secret.
    #[serde(default)]
    pub force: bool,
}

/// `GET /pre-authorize/:pub_key?force=true`
pub async fn pre_authorize(
    Extension(gateway): Extension<Arc<Gateway>>,
    Path(pub_key): Path<String>,
    Query(query): Query<PreAuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    let force_secret = query
        .force
        .then(|| authorization_value(&headers).unwrap_or_default());

    let result = gateway
        .hierarchy()
        .pre_authorize_key(&pub_key, force_secret)
        .await?;

    let metrics = gateway.metrics();
    match result.outcome {
        PreAuthOutcome::AlreadyAuthorized => {}
        PreAuthOutcome::Forced => {
            metrics.preauth_grants_total.fetch_add(1, Ordering::Relaxed);
            metrics
                .preauth_overrides_total
                .fetch_add(1, Ordering::Relaxed);
        }
        PreAuthOutcome::Open | PreAuthOutcome::Verified => {
            metrics.preauth_grants_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    Ok(Json(json!({
        "success": true,
        "pubKey": result.pub_key,
        "expiresAt": result.expires_at,
        "expiresIn": result.expires_in(),
        "alreadyAuthorized": result.outcome == PreAuthOutcome::AlreadyAuthorized,
    })))
}

/// Body of `POST /pre-authorize-token`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAuthorizeTokenRequest {
    /// Signed bearer token to grant.
    pub token: String,
    /// Grant lifetime; the configured default when absent.
    pub ttl_seconds: Option<u64>,
}

/// `POST /pre-authorize-token` (admin only)
pub async fn pre_authorize_token(
    Extension(gateway): Extension<Arc<Gateway>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<PreAuthorizeTokenRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    gateway.hierarchy().require_admin(&principal)?;
    let request = json_body(payload)?;

    let grant = gateway
        .hierarchy()
        .pre_authorize_token(&request.token, request.ttl_seconds.map(Duration::from_secs))
        .await?;
    gateway
        .metrics()
        .preauth_grants_total
        .fetch_add(1, Ordering::Relaxed);

    let expires_in = (grant.expires_at - crate::clock::now_millis()).max(0);
    Ok(Json(json!({
        "success": true,
        "expiresAt": grant.expires_at,
        "expiresIn": expires_in,
    })))
}

/// Body of `POST /verify-token`.
#[derive(Debug, Deserialize)]
pub struct VerifyTokenRequest {
    /// Credential to check.
    pub token: String,
}

/// `POST /verify-token`
///
/// Checks the system secret and issued bearer tokens only; membership and
/// grants are not consulted.
pub async fn verify_token(
    Extension(gateway): Extension<Arc<Gateway>>,
    payload: Result<Json<VerifyTokenRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let request = json_body(payload)?;
    let hierarchy = gateway.hierarchy();

    let principal = if hierarchy.is_system_secret(&request.token) {
        Some(Principal::system())
    } else {
        hierarchy.tokens().validate(&request.token).await
    };

    let response = match principal {
        Some(principal) => Json(json!({
            "success": true,
            "tokenInfo": {
                "valid": true,
                "userId": principal.user_id,
                "permissions": principal.permissions,
                "source": principal.source,
            },
        }))
        .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "valid": false,
                "error": "invalid or expired token",
            })),
        )
            .into_response(),
    };
    Ok(response)
}
