//! Time-boxed pre-authorization grants.
//!
//! Grants live only in memory: a restart clears them. Expiry is lazy, a read
//! of an expired grant behaves as if it were absent, and the cleanup task
//! sweeps them out periodically.

use crate::clock::{deadline_after, now_millis};
use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;

/// Default grant lifetime.
pub const DEFAULT_PREAUTH_TTL: Duration = Duration::from_secs(5 * 60);

/// A live grant for one textual key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAuthorizedKey {
    /// Expiry, Unix milliseconds.
    pub expires_at: i64,
}

/// Contract every pre-authorization backend satisfies.
pub trait GrantStore: Send + Sync {
    /// Insert or overwrite the grant for `key` with an absolute expiry.
    fn grant_until(&self, key: &str, expires_at: i64) -> PreAuthorizedKey;

    /// Read the grant for `key`, treating expired grants as absent.
    fn get(&self, key: &str) -> Option<PreAuthorizedKey>;

    /// Remove the grant for `key`. Returns whether one was stored.
    fn remove(&self, key: &str) -> bool;

    /// Insert or overwrite the grant for `key`, expiring after `ttl`.
    ///
    /// A `ttl` too large to represent never expires.
    fn authorize(&self, key: &str, ttl: Duration) -> PreAuthorizedKey {
        self.grant_until(key, deadline_after(ttl).unwrap_or(i64::MAX))
    }

    /// True iff a grant exists for `key` and has not expired.
    fn is_authorized(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// In-memory grant map keyed by arbitrary strings.
#[derive(Debug, Default)]
pub struct PreAuthorizationCache {
    grants: DashMap<String, PreAuthorizedKey>,
}

impl PreAuthorizationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let before = self.grants.len();
        self.grants.retain(|_, grant| now < grant.expires_at);
        before.saturating_sub(self.grants.len())
    }
}

impl GrantStore for PreAuthorizationCache {
    fn grant_until(&self, key: &str, expires_at: i64) -> PreAuthorizedKey {
        let grant = PreAuthorizedKey { expires_at };
        self.grants.insert(key.to_string(), grant);
        grant
    }

    fn get(&self, key: &str) -> Option<PreAuthorizedKey> {
        let grant = *self.grants.get(key)?;
        if now_millis() < grant.expires_at {
            Some(grant)
        } else {
            None
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.grants.remove(key).is_some()
    }
}
