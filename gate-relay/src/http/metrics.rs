//! Prometheus metrics endpoint.

use crate::server::Gateway;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP gate_relay_{name} {help}");
    let _ = writeln!(out, "# TYPE gate_relay_{name} counter");
    let _ = writeln!(out, "gate_relay_{name} {value}\n");
}

/// Render every gauge and counter in Prometheus text format.
pub fn render(gateway: &Gateway) -> String {
    let m = gateway.metrics();
    let mut out = String::new();

    let _ = writeln!(out, "# HELP gate_relay_info Server information");
    let _ = writeln!(out, "# TYPE gate_relay_info gauge");
    let _ = writeln!(
        out,
        "gate_relay_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );

    let _ = writeln!(out, "# HELP gate_relay_preauthorized_keys Stored pre-authorization entries");
    let _ = writeln!(out, "# TYPE gate_relay_preauthorized_keys gauge");
    let _ = writeln!(out, "gate_relay_preauthorized_keys {}\n", gateway.grants().len());

    let counters = [
        ("auth_granted_total", "Requests resolved to a principal", &m.auth_granted_total),
        ("auth_denied_total", "Requests rejected by every trust source", &m.auth_denied_total),
        ("writes_forwarded_total", "Inbound wire writes forwarded", &m.writes_forwarded_total),
        ("writes_dropped_total", "Inbound wire writes dropped", &m.writes_dropped_total),
        ("preauth_grants_total", "Pre-authorization grants made", &m.preauth_grants_total),
        ("preauth_overrides_total", "Grants forced with the system secret", &m.preauth_overrides_total),
        ("tokens_created_total", "Bearer tokens issued", &m.tokens_created_total),
        ("tokens_revoked_total", "Bearer tokens revoked", &m.tokens_revoked_total),
    ];
    for (name, help, value) in counters {
        counter(&mut out, name, help, value.load(Ordering::Relaxed));
    }

    counter(
        &mut out,
        "membership_failures_total",
        "Membership registry calls that failed or timed out",
        gateway.hierarchy().membership().failure_count(),
    );
    counter(
        &mut out,
        "audit_accepted_total",
        "Audit entries accepted",
        gateway.audit().accepted_count(),
    );
    counter(
        &mut out,
        "audit_dropped_total",
        "Audit entries shed by the rate limit",
        gateway.audit().dropped_count(),
    );

    out
}

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(gateway): Extension<Arc<Gateway>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&gateway),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteGraph;

    #[tokio::test]
    async fn render_includes_every_counter() {
        let mut config = Config::default();
        config.auth.token_signing_key = "k".into();
        let graph = Arc::new(SqliteGraph::in_memory().await.unwrap());
        let (gateway, _drain) = Gateway::from_config(config, graph);
        gateway
            .metrics()
            .writes_dropped_total
            .fetch_add(3, Ordering::Relaxed);

        let body = render(&gateway);
        assert!(body.contains("# TYPE gate_relay_writes_dropped_total counter"));
        assert!(body.contains("gate_relay_writes_dropped_total 3"));
        assert!(body.contains("gate_relay_membership_failures_total 0"));
        assert!(body.contains("gate_relay_audit_dropped_total 0"));
        assert!(body.contains("gate_relay_preauthorized_keys 0"));
    }
}
