//! On-chain membership verification.
//!
//! The registry is reachable only through slow calls that may fail or hang.
//! [`MembershipGate`] bounds every call with a timeout and turns failures into
//! negative answers so callers can fall through to the next trust source.

use crate::error::GatewayError;
use async_trait::async_trait;
use gate_types::membership_hex;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Errors from a membership registry call.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// Transport failure talking to the registry.
    #[error("registry transport error: {0}")]
    Transport(String),

    /// The registry answered with an error.
    #[error("registry error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// The registry answer could not be understood.
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for MembershipError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// The membership registry as the gateway consumes it.
#[async_trait]
pub trait MembershipVerifier: Send + Sync {
    /// Addresses of every registered relay.
    async fn get_all_relays(&self) -> Result<Vec<String>, MembershipError>;

    /// Whether `hex_key` is authorized on the relay at `relay_address`.
    async fn is_public_key_authorized(
        &self,
        relay_address: &str,
        hex_key: &str,
    ) -> Result<bool, MembershipError>;
}

/// Outcome of a membership scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipVerdict {
    /// At least one relay authorizes the key.
    Authorized,
    /// Every relay answered and none authorizes the key, or some failed.
    NotAuthorized,
    /// The registry lists no relays.
    NoRelays,
    /// The relay list itself could not be fetched in time.
    Unreachable,
}

/// Bounded, failure-tolerant access to a [`MembershipVerifier`].
pub struct MembershipGate {
    verifier: Option<Arc<dyn MembershipVerifier>>,
    lookup_timeout: Duration,
    scan_timeout: Duration,
    failures: AtomicU64,
}

impl std::fmt::Debug for MembershipGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipGate")
            .field("enabled", &self.is_enabled())
            .field("lookup_timeout", &self.lookup_timeout)
            .field("scan_timeout", &self.scan_timeout)
            .field("failures", &self.failure_count())
            .finish()
    }
}

impl MembershipGate {
    /// A gate with membership verification turned off.
    pub fn disabled() -> Self {
        Self {
            verifier: None,
            lookup_timeout: Duration::from_secs(3),
            scan_timeout: Duration::from_secs(10),
            failures: AtomicU64::new(0),
        }
    }

    /// A gate over `verifier` with per-call and whole-scan bounds.
    pub fn new(
        verifier: Arc<dyn MembershipVerifier>,
        lookup_timeout: Duration,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            verifier: Some(verifier),
            lookup_timeout,
            scan_timeout,
            failures: AtomicU64::new(0),
        }
    }

    /// Whether membership verification is turned on.
    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Registry calls that failed or timed out since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Ask every known relay whether `key` is authorized; the first `true` wins.
    ///
    /// Relays are queried one at a time in registry order. A relay that errors
    /// or times out counts as a `false` from that relay.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the key cannot be converted to hex, `Unavailable`
    /// if verification is disabled.
    pub async fn check(&self, key: &str) -> Result<MembershipVerdict, GatewayError> {
        let Some(verifier) = &self.verifier else {
            return Err(GatewayError::Unavailable(
                "membership verification is disabled".to_string(),
            ));
        };
        let hex_key = membership_hex(key)?;

        let scan = self.scan(verifier.as_ref(), &hex_key);
        match tokio::time::timeout(self.scan_timeout, scan).await {
            Ok(verdict) => Ok(verdict),
            Err(_) => {
                tracing::warn!("Membership scan timed out after {:?}", self.scan_timeout);
                self.failures.fetch_add(1, Ordering::Relaxed);
                Ok(MembershipVerdict::NotAuthorized)
            }
        }
    }

    async fn scan(&self, verifier: &dyn MembershipVerifier, hex_key: &str) -> MembershipVerdict {
        let relays = match tokio::time::timeout(self.lookup_timeout, verifier.get_all_relays()).await
        {
            Ok(Ok(relays)) => relays,
            Ok(Err(e)) => {
                tracing::warn!("Failed to list relays: {}", e);
                self.failures.fetch_add(1, Ordering::Relaxed);
                return MembershipVerdict::Unreachable;
            }
            Err(_) => {
                tracing::warn!("Listing relays timed out after {:?}", self.lookup_timeout);
                self.failures.fetch_add(1, Ordering::Relaxed);
                return MembershipVerdict::Unreachable;
            }
        };

        if relays.is_empty() {
            return MembershipVerdict::NoRelays;
        }

        for relay in &relays {
            let call = verifier.is_public_key_authorized(relay, hex_key);
            match tokio::time::timeout(self.lookup_timeout, call).await {
                Ok(Ok(true)) => {
                    tracing::debug!("Key authorized by relay {}", relay);
                    return MembershipVerdict::Authorized;
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Relay {} failed membership check: {}", relay, e);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    tracing::warn!("Relay {} membership check timed out", relay);
                    self.failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        MembershipVerdict::NotAuthorized
    }
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client for a membership registry bridge.
///
/// Speaks two methods: `getAllRelays()` returning an address array, and
/// `isPublicKeyAuthorized(relay, hexKey)` returning a boolean.
#[derive(Debug, Clone)]
pub struct JsonRpcMembership {
    client: reqwest::Client,
    endpoint: String,
}

impl JsonRpcMembership {
    /// Create a client for the registry bridge at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, MembershipError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(MembershipError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        response
            .result
            .ok_or_else(|| MembershipError::Malformed(format!("{method}: missing result")))
    }
}

#[async_trait]
impl MembershipVerifier for JsonRpcMembership {
    async fn get_all_relays(&self) -> Result<Vec<String>, MembershipError> {
        self.call("getAllRelays", serde_json::json!([])).await
    }

    async fn is_public_key_authorized(
        &self,
        relay_address: &str,
        hex_key: &str,
    ) -> Result<bool, MembershipError> {
        self.call(
            "isPublicKeyAuthorized",
            serde_json::json!([relay_address, hex_key]),
        )
        .await
    }
}
