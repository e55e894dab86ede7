//! Gateway assembly.
//!
//! [`Gateway`] owns every component and wires them together from a
//! [`Config`]. HTTP handlers and background tasks reach components through it.

use crate::audit::{AuditDrain, ThrottledAuditLog};
use crate::config::Config;
use crate::hierarchy::AuthorizationHierarchy;
use crate::membership::{JsonRpcMembership, MembershipGate, MembershipVerifier};
use crate::preauth::PreAuthorizationCache;
use crate::storage::GraphStore;
use crate::tokens::TokenStore;
use crate::wire::WireGuard;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operational metrics for monitoring gateway activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Audit and membership failure counters live on their components.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Requests resolved to a principal.
    pub auth_granted_total: AtomicU64,
    /// Requests rejected by the hierarchy.
    pub auth_denied_total: AtomicU64,
    /// Inbound writes handed to the sync engine.
    pub writes_forwarded_total: AtomicU64,
    /// Inbound writes silently dropped.
    pub writes_dropped_total: AtomicU64,
    /// Pre-authorization grants made (keys and tokens).
    pub preauth_grants_total: AtomicU64,
    /// Grants forced with the system secret.
    pub preauth_overrides_total: AtomicU64,
    /// Bearer tokens issued.
    pub tokens_created_total: AtomicU64,
    /// Bearer tokens revoked.
    pub tokens_revoked_total: AtomicU64,
}

/// The authorization gateway.
pub struct Gateway {
    config: Config,
    hierarchy: Arc<AuthorizationHierarchy>,
    grants: Arc<PreAuthorizationCache>,
    wire: WireGuard,
    audit: Arc<ThrottledAuditLog>,
    metrics: Arc<GatewayMetrics>,
    started: Instant,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("hierarchy", &self.hierarchy)
            .field("preauthorized_keys", &self.grants.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Assemble a gateway over `graph`.
    ///
    /// `verifier` is used only when membership is enabled in `config`. The
    /// returned drain must be spawned for audit entries to be emitted.
    pub fn new(
        config: Config,
        graph: Arc<dyn GraphStore>,
        verifier: Option<Arc<dyn MembershipVerifier>>,
    ) -> (Self, AuditDrain) {
        let auth = &config.auth;
        let tokens = Arc::new(
            TokenStore::new(graph, auth.token_signing_key.as_bytes())
                .with_default_ttl(Duration::from_secs(
                    auth.default_token_ttl_days * 24 * 60 * 60,
                ))
                .with_timeouts(auth.list_timeout(), auth.revoke_timeout()),
        );

        let membership = match verifier {
            Some(verifier) if config.membership.enabled => MembershipGate::new(
                verifier,
                Duration::from_millis(config.membership.lookup_timeout_ms),
                Duration::from_millis(config.membership.scan_timeout_ms),
            ),
            _ => MembershipGate::disabled(),
        };

        let grants = Arc::new(PreAuthorizationCache::new());
        let hierarchy = Arc::new(
            AuthorizationHierarchy::new(
                &auth.shared_secret,
                tokens,
                grants.clone(),
                Arc::new(membership),
            )
            .with_preauth_ttl(auth.preauth_ttl()),
        );

        let (audit, drain) = ThrottledAuditLog::new(&config.audit);
        let audit = Arc::new(audit);
        let metrics = Arc::new(GatewayMetrics::default());
        let wire = WireGuard::new(
            &auth.shared_secret,
            hierarchy.clone(),
            audit.clone(),
            metrics.clone(),
            auth.disable_write_gating,
        );

        if auth.shared_secret.is_empty() {
            tracing::warn!("No shared secret configured; system access is disabled");
        }

        let gateway = Self {
            config,
            hierarchy,
            grants,
            wire,
            audit,
            metrics,
            started: Instant::now(),
        };
        (gateway, drain)
    }

    /// Assemble a gateway, building the JSON-RPC membership client from config.
    pub fn from_config(config: Config, graph: Arc<dyn GraphStore>) -> (Self, AuditDrain) {
        let verifier = match (&config.membership.provider_url, config.membership.enabled) {
            (Some(url), true) => {
                tracing::info!("Membership verification via {}", url);
                let client: Arc<dyn MembershipVerifier> =
                    Arc::new(JsonRpcMembership::new(url.clone()));
                Some(client)
            }
            _ => {
                tracing::info!("Membership verification disabled");
                None
            }
        };
        Self::new(config, graph, verifier)
    }

    /// Get the gateway configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the authorization hierarchy.
    pub fn hierarchy(&self) -> &AuthorizationHierarchy {
        &self.hierarchy
    }

    /// Get the token store.
    pub fn tokens(&self) -> &TokenStore {
        self.hierarchy.tokens()
    }

    /// Get the pre-authorization cache.
    pub fn grants(&self) -> &Arc<PreAuthorizationCache> {
        &self.grants
    }

    /// Get the wire hooks to install on the sync engine.
    pub fn wire(&self) -> &WireGuard {
        &self.wire
    }

    /// Get the audit log.
    pub fn audit(&self) -> &ThrottledAuditLog {
        &self.audit
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Seconds since the gateway was assembled.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::tests::{Answer, ScriptedVerifier};
    use crate::storage::SqliteGraph;
    use gate_types::{TrustSource, WireMessage};
    use serde_json::json;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.auth.shared_secret = "secret".into();
        config.auth.token_signing_key = "signing".into();
        config
    }

    async fn graph() -> Arc<dyn GraphStore> {
        Arc::new(SqliteGraph::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn disabled_membership_ignores_verifier() {
        let verifier = Arc::new(ScriptedVerifier::new(&[("relay-a", Answer::Yes)]));
        let verifier = verifier as Arc<dyn MembershipVerifier>;
        let (gateway, _drain) = Gateway::new(test_config(), graph().await, Some(verifier));
        assert!(!gateway.hierarchy().membership().is_enabled());
    }

    #[tokio::test]
    async fn enabled_membership_uses_verifier() {
        let mut config = test_config();
        config.membership.enabled = true;
        let verifier = Arc::new(ScriptedVerifier::new(&[("relay-a", Answer::Yes)]));
        let verifier = verifier as Arc<dyn MembershipVerifier>;
        let (gateway, _drain) = Gateway::new(config, graph().await, Some(verifier));

        let creds = crate::hierarchy::Credentials {
            token: None,
            public_key: Some("AQI".into()),
        };
        let principal = gateway.hierarchy().authenticate(&creds).await.unwrap();
        assert_eq!(principal.source, TrustSource::Onchain);
    }

    #[tokio::test]
    async fn token_ttl_follows_config() {
        let mut config = test_config();
        config.auth.default_token_ttl_days = 1;
        let (gateway, _drain) = Gateway::from_config(config, graph().await);

        let token = gateway.tokens().create("u1", None, None).await.unwrap();
        assert!((token.expires_at - token.created_at - 86_400_000).abs() < 5000);
    }

    #[tokio::test]
    async fn wire_guard_uses_configured_secret() {
        let (gateway, _drain) = Gateway::from_config(test_config(), graph().await);

        let mut msg = WireMessage::put([("users/a".to_string(), json!({}))]);
        gateway.wire().outbound(&mut msg);
        assert_eq!(msg.token.as_deref(), Some("secret"));
        assert_eq!(
            gateway.wire().inbound(&msg),
            crate::wire::Verdict::Forward
        );
    }
}
