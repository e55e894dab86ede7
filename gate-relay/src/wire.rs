//! Hooks on the sync engine's message pipeline.
//!
//! Both hooks are synchronous. Outbound messages are stamped with the shared
//! secret. Inbound writes pass one of the checks below or are dropped without
//! a reply:
//!
//! ```text
//! RECEIVED ─► write? ─no──────────────────────────────► FORWARD
//!               │yes
//!               ├─► identity souls only? ─yes─────────► FORWARD
//!               ├─► gating disabled? ─yes─────────────► FORWARD
//!               └─► secret or granted token? ─yes─────► FORWARD
//!                                            └─no─────► DROP
//! ```

use crate::audit::ThrottledAuditLog;
use crate::hierarchy::AuthorizationHierarchy;
use crate::server::GatewayMetrics;
use gate_types::WireMessage;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Decision for an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the message to the sync engine.
    Forward,
    /// Discard the message silently.
    Drop,
}

/// Write gate installed on the sync engine.
pub struct WireGuard {
    shared_secret: Zeroizing<String>,
    hierarchy: Arc<AuthorizationHierarchy>,
    audit: Arc<ThrottledAuditLog>,
    metrics: Arc<GatewayMetrics>,
    gating_disabled: bool,
}

impl std::fmt::Debug for WireGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireGuard")
            .field("gating_disabled", &self.gating_disabled)
            .finish_non_exhaustive()
    }
}

impl WireGuard {
    /// Create the hook pair.
    pub fn new(
        shared_secret: &str,
        hierarchy: Arc<AuthorizationHierarchy>,
        audit: Arc<ThrottledAuditLog>,
        metrics: Arc<GatewayMetrics>,
        gating_disabled: bool,
    ) -> Self {
        if gating_disabled {
            tracing::warn!("Inbound write gating is DISABLED; every write will be accepted");
        }
        Self {
            shared_secret: Zeroizing::new(shared_secret.to_string()),
            hierarchy,
            audit,
            metrics,
            gating_disabled,
        }
    }

    /// Stamp an outgoing message with the shared secret.
    pub fn outbound(&self, message: &mut WireMessage) {
        if !self.shared_secret.is_empty() {
            message.stamp_token(&self.shared_secret);
        }
        self.observe(message);
    }

    /// Decide whether an incoming message reaches the sync engine.
    pub fn inbound(&self, message: &WireMessage) -> Verdict {
        self.observe(message);

        if !message.is_write() {
            return Verdict::Forward;
        }

        let verdict = if message.is_identity_write()
            || self.gating_disabled
            || self.hierarchy.admit_write(message)
        {
            Verdict::Forward
        } else {
            Verdict::Drop
        };

        match verdict {
            Verdict::Forward => {
                self.metrics
                    .writes_forwarded_total
                    .fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Drop => {
                self.metrics
                    .writes_dropped_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropped unauthorized write: {}", message.summary());
            }
        }
        verdict
    }

    fn observe(&self, message: &WireMessage) {
        if let Some(direction) = message.direction() {
            self.audit.record(direction, message.summary());
        }
    }
}
