//! HTTP endpoints for gate-relay.
//!
//! Public: health, metrics, token verification and key pre-authorization.
//! Everything else runs behind the [`auth::require_auth`] middleware.

pub mod auth;
pub mod health;
mod metrics;
mod preauth;
mod tokens;

use crate::error::GatewayError;
use crate::server::Gateway;
use axum::{
    extract::rejection::JsonRejection,
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| GatewayError::InvalidArgument(e.body_text()))
}

/// Build the HTTP router with all endpoints.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let protected = Router::new()
        .route("/tokens", post(tokens::create_token).get(tokens::list_tokens))
        .route("/tokens/:token_id", delete(tokens::revoke_token))
        .route("/pre-authorize-token", post(preauth::pre_authorize_token))
        .route_layer(middleware::from_fn_with_state(
            gateway.clone(),
            auth::require_auth,
        ));

    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/verify-token", post(preauth::verify_token))
        .route("/pre-authorize/:pub_key", get(preauth::pre_authorize))
        .merge(protected);

    if gateway.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(gateway))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::now_millis;
    use crate::config::Config;
    use crate::membership::tests::{Answer, ScriptedVerifier};
    use crate::membership::MembershipVerifier;
    use crate::preauth::GrantStore;
    use crate::storage::SqliteGraph;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use gate_types::WireMessage;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    const SECRET: &str = "test-secret";

    fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.shared_secret = SECRET.into();
        config.auth.token_signing_key = "test-signing".into();
        config
    }

    async fn test_gateway(config: Config, verifier: Option<ScriptedVerifier>) -> Arc<Gateway> {
        let graph = Arc::new(SqliteGraph::in_memory().await.unwrap());
        let verifier = verifier.map(|v| Arc::new(v) as Arc<dyn MembershipVerifier>);
        let (gateway, _drain) = Gateway::new(config, graph, verifier);
        Arc::new(gateway)
    }

    fn request(method: &str, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(bearer) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_of(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = build_router(test_gateway(test_config(), None).await);

        let response = app.oneshot(request("GET", "/health", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_of(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["preauthorizedKeys"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_follows_config() {
        let app = build_router(test_gateway(test_config(), None).await);
        let response = app.oneshot(request("GET", "/metrics", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut config = test_config();
        config.http.metrics_enabled = false;
        let app = build_router(test_gateway(config, None).await);
        let response = app.oneshot(request("GET", "/metrics", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_routes_reject_anonymous() {
        let gateway = test_gateway(test_config(), None).await;
        let app = build_router(gateway.clone());

        let response = app.oneshot(request("GET", "/tokens", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_of(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
        assert_eq!(
            gateway
                .metrics()
                .auth_denied_total
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn token_lifecycle_end_to_end() {
        let gateway = test_gateway(test_config(), None).await;
        let user_token = gateway.tokens().create("u1", Some("login"), None).await.unwrap();
        let bearer = user_token.token.as_str();
        let app = build_router(gateway.clone());

        // Create
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/tokens",
                Some(bearer),
                Some(json!({"name": "CI", "expiresInDays": 1})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_of(response).await;
        assert_eq!(body["success"], true);
        let id = body["token"]["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        let expires_at = body["token"]["expiresAt"].as_i64().unwrap();
        assert!((expires_at - (now_millis() + 86_400_000)).abs() < 5000);
        assert_eq!(body["token"]["userId"], "u1");
        assert_eq!(body["token"]["revoked"], false);

        // List
        let response = app
            .clone()
            .oneshot(request("GET", "/tokens", Some(bearer), None))
            .await
            .unwrap();
        let body = json_of(response).await;
        let tokens = body["tokens"].as_array().unwrap();
        assert!(tokens.iter().any(|t| t["name"] == "CI"));
        assert!(tokens.iter().all(|t| t["token"].as_str().unwrap().contains("...")));

        // Revoke twice
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("DELETE", &format!("/tokens/{id}"), Some(bearer), None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_of(response).await, json!({"success": true}));
        }
    }

    #[tokio::test]
    async fn users_cannot_revoke_foreign_tokens() {
        let gateway = test_gateway(test_config(), None).await;
        let mine = gateway.tokens().create("u1", None, None).await.unwrap();
        let theirs = gateway.tokens().create("u2", None, None).await.unwrap();
        let app = build_router(gateway);

        let uri = format!("/tokens/{}", theirs.id);
        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some(&mine.token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // The system principal resolves the owner through the index
        let response = app
            .oneshot(request("DELETE", &uri, Some(SECRET), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_token_id_is_bad_request() {
        let app = build_router(test_gateway(test_config(), None).await);
        let response = app
            .oneshot(request("DELETE", "/tokens/not-hex", Some(SECRET), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_token_reports_principal() {
        let gateway = test_gateway(test_config(), None).await;
        let token = gateway.tokens().create("u1", None, None).await.unwrap();
        let app = build_router(gateway);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/verify-token",
                None,
                Some(json!({"token": token.token})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_of(response).await;
        assert_eq!(body["tokenInfo"]["valid"], true);
        assert_eq!(body["tokenInfo"]["userId"], "u1");
        assert_eq!(body["tokenInfo"]["source"], "jwt");

        let response = app
            .oneshot(request(
                "POST",
                "/verify-token",
                None,
                Some(json!({"token": "garbage"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_of(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["valid"], false);
    }

    #[tokio::test]
    async fn missing_body_is_bad_request() {
        let app = build_router(test_gateway(test_config(), None).await);
        let response = app
            .oneshot(request("POST", "/verify-token", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_of(response).await["success"], false);
    }

    #[tokio::test]
    async fn pre_authorize_open_when_membership_disabled() {
        let gateway = test_gateway(test_config(), None).await;
        let app = build_router(gateway.clone());

        let response = app
            .oneshot(request("GET", "/pre-authorize/@abc.xyz", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_of(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["pubKey"], "@abc.xyz");
        assert!(body["expiresIn"].as_i64().unwrap() > 0);

        for variant in ["abc", "@abc", "abc.xyz", "@abc.xyz"] {
            assert!(gateway.grants().is_authorized(variant), "{variant}");
        }
    }

    #[tokio::test]
    async fn pre_authorize_consults_membership() {
        let mut config = test_config();
        config.membership.enabled = true;

        let verifier = ScriptedVerifier::new(&[("relay-a", Answer::Fail), ("relay-b", Answer::Yes)]);
        let app = build_router(test_gateway(config.clone(), Some(verifier)).await);
        let response = app
            .oneshot(request("GET", "/pre-authorize/AQI", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let verifier = ScriptedVerifier::new(&[("relay-a", Answer::No)]);
        let app = build_router(test_gateway(config.clone(), Some(verifier)).await);
        let response = app
            .oneshot(request("GET", "/pre-authorize/AQI", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let app = build_router(test_gateway(config.clone(), Some(ScriptedVerifier::new(&[]))).await);
        let response = app
            .oneshot(request("GET", "/pre-authorize/AQI", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let verifier = ScriptedVerifier::new(&[("relay-a", Answer::Yes)]);
        let app = build_router(test_gateway(config, Some(verifier)).await);
        let response = app
            .oneshot(request("GET", "/pre-authorize/@!!!", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forced_pre_authorize_needs_secret() {
        let mut config = test_config();
        config.membership.enabled = true;
        let verifier = ScriptedVerifier::new(&[("relay-a", Answer::No)]);
        let gateway = test_gateway(config, Some(verifier)).await;
        let app = build_router(gateway.clone());

        let response = app
            .clone()
            .oneshot(request("GET", "/pre-authorize/AQI?force=true", Some("wrong"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/pre-authorize/AQI?force=true", Some(SECRET), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(gateway.grants().is_authorized("@AQI"));
        assert_eq!(
            gateway
                .metrics()
                .preauth_overrides_total
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn pre_authorize_token_is_admin_only() {
        let gateway = test_gateway(test_config(), None).await;
        let token = gateway.tokens().create("u1", None, None).await.unwrap();
        let app = build_router(gateway.clone());
        let body = json!({"token": token.token, "ttlSeconds": 60});

        let response = app
            .clone()
            .oneshot(request("POST", "/pre-authorize-token", Some(&token.token), Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request("POST", "/pre-authorize-token", Some(SECRET), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut msg = WireMessage::put([("users/u1/profile".to_string(), json!({}))]);
        msg.token = Some(token.token);
        assert!(gateway.hierarchy().admit_write(&msg));
    }

    #[tokio::test]
    async fn pre_authorize_token_rejects_out_of_range_ttl() {
        let gateway = test_gateway(test_config(), None).await;
        let token = gateway.tokens().create("u1", None, None).await.unwrap();
        let app = build_router(gateway.clone());

        for ttl in [u64::MAX, 9_223_372_036_854_775] {
            let body = json!({"token": token.token, "ttlSeconds": ttl});
            let response = app
                .clone()
                .oneshot(request("POST", "/pre-authorize-token", Some(SECRET), Some(body)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{ttl}");
            assert_eq!(json_of(response).await["success"], false);
        }
        assert!(gateway.grants().is_empty());
    }

    #[tokio::test]
    async fn revoking_a_token_ends_its_wire_grant() {
        let gateway = test_gateway(test_config(), None).await;
        let token = gateway.tokens().create("u1", None, None).await.unwrap();
        let app = build_router(gateway.clone());

        let body = json!({"token": token.token, "ttlSeconds": 3600});
        let response = app
            .clone()
            .oneshot(request("POST", "/pre-authorize-token", Some(SECRET), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut msg = WireMessage::put([("users/u1/profile".to_string(), json!({}))]);
        msg.token = Some(token.token.clone());
        assert_eq!(gateway.wire().inbound(&msg), crate::wire::Verdict::Forward);

        let uri = format!("/tokens/{}", token.id);
        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some(&token.token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(gateway.wire().inbound(&msg), crate::wire::Verdict::Drop);
        let response = app
            .oneshot(request("GET", "/tokens", Some(&token.token), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn system_secret_works_on_protected_routes() {
        let app = build_router(test_gateway(test_config(), None).await);
        let response = app
            .oneshot(request("POST", "/tokens", Some(SECRET), Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_of(response).await["token"]["userId"], "system");
    }
}
