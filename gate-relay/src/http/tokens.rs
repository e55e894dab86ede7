//! Bearer token management endpoints.

use super::json_body;
use crate::clock::now_millis;
use crate::error::GatewayError;
use crate::server::Gateway;
use axum::{
    extract::{rejection::JsonRejection, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use gate_types::{Principal, TokenId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

const SYSTEM_OWNER: &str = "system";
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Body of `POST /tokens`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    /// Human label.
    pub name: Option<String>,
    /// Lifetime in days; the configured default when absent.
    pub expires_in_days: Option<u32>,
}

fn owner(principal: &Principal) -> Result<String, GatewayError> {
    match &principal.user_id {
        Some(user_id) => Ok(user_id.clone()),
        None if principal.is_system_token => Ok(SYSTEM_OWNER.to_string()),
        None => Err(GatewayError::Unauthorized(
            "principal has no user identity".to_string(),
        )),
    }
}

/// `POST /tokens`
pub async fn create_token(
    Extension(gateway): Extension<Arc<Gateway>>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateTokenRequest>, JsonRejection>,
) -> Result<Json<Value>, GatewayError> {
    let request = json_body(payload)?;
    let user_id = owner(&principal)?;
    let expires_at = request
        .expires_in_days
        .map(|days| now_millis() + i64::from(days) * DAY_MILLIS);

    let token = gateway
        .tokens()
        .create(&user_id, request.name.as_deref(), expires_at)
        .await?;
    gateway
        .metrics()
        .tokens_created_total
        .fetch_add(1, Ordering::Relaxed);

    Ok(Json(json!({ "success": true, "token": token })))
}

/// `GET /tokens`
pub async fn list_tokens(
    Extension(gateway): Extension<Arc<Gateway>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, GatewayError> {
    let user_id = owner(&principal)?;
    let tokens = gateway.tokens().list(&user_id).await?;
    Ok(Json(json!({ "success": true, "tokens": tokens })))
}

/// `DELETE /tokens/:token_id`
///
/// The system principal may revoke any token; everyone else only their own.
pub async fn revoke_token(
    Extension(gateway): Extension<Arc<Gateway>>,
    Extension(principal): Extension<Principal>,
    Path(token_id): Path<String>,
) -> Result<Response, GatewayError> {
    let token_id: TokenId = token_id
        .parse()
        .map_err(|_| GatewayError::InvalidArgument(format!("invalid token id: {token_id}")))?;

    let user_id = if principal.is_system_token {
        match gateway.tokens().find(&token_id).await? {
            Some(token) => token.user_id,
            None => return Err(GatewayError::NotFound(format!("token {token_id}"))),
        }
    } else {
        owner(&principal)?
    };

    if gateway.hierarchy().revoke_token(&user_id, &token_id).await? {
        gateway
            .metrics()
            .tokens_revoked_total
            .fetch_add(1, Ordering::Relaxed);
        Ok(Json(json!({ "success": true })).into_response())
    } else {
        let body = json!({
            "success": false,
            "error": "revocation was not acknowledged by storage",
        });
        Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
    }
}
