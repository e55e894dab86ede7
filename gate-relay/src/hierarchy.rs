//! The ordered trust evaluation behind every authorization decision.
//!
//! Sources are consulted strictly in this order, stopping at the first that
//! accepts:
//!
//! 1. the shared system secret
//! 2. on-chain membership, when enabled
//! 3. a bearer token issued by the [`TokenStore`]
//! 4. a live pre-authorization grant
//!
//! A failing or timed-out source falls through to the next one. Only when
//! all four decline is the caller rejected.
//!
//! The wire layer uses [`AuthorizationHierarchy::admit_write`], which is
//! synchronous and consults only the secret and the grant cache. Membership
//! results reach the wire through grants made by the pre-authorize flow.
//!
//! Grants for signed tokens are keyed by token id, never by the token text,
//! and are removed when the token is revoked. Tier 4 only honours key grants:
//! a signed token that failed tier 3 is not live, whatever its grant says.

use crate::clock::{deadline_after, now_millis};
use crate::error::{GatewayError, Result};
use crate::membership::{MembershipGate, MembershipVerdict};
use crate::preauth::{GrantStore, PreAuthorizedKey, DEFAULT_PREAUTH_TTL};
use crate::storage::Node;
use crate::tokens::TokenStore;
use gate_types::{key_variants, strip_key, Principal, TokenId, TrustSource, WireMessage};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

const OVERRIDES_ROOT: &str = "overrides";
const TOKEN_GRANT_PREFIX: &str = "token:";

/// Credentials extracted from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer credential: the shared secret, a signed token or a bare key.
    pub token: Option<String>,
    /// Public key named explicitly by the caller.
    pub public_key: Option<String>,
}

impl Credentials {
    /// Credentials carrying only a bearer value.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            public_key: None,
        }
    }
}

/// How a pre-authorization request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreAuthOutcome {
    /// A live grant already existed.
    AlreadyAuthorized,
    /// Granted by the system secret without membership proof.
    Forced,
    /// Granted because membership verification is disabled.
    Open,
    /// Granted after a positive membership check.
    Verified,
}

/// Result of a successful pre-authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAuthorization {
    /// The key as presented.
    pub pub_key: String,
    /// Grant expiry, Unix milliseconds.
    pub expires_at: i64,
    /// Which path granted it.
    pub outcome: PreAuthOutcome,
}

impl PreAuthorization {
    /// Milliseconds until the grant lapses.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - now_millis()).max(0)
    }
}

/// Composes the trust sources into one decision procedure.
pub struct AuthorizationHierarchy {
    shared_secret: Zeroizing<String>,
    tokens: Arc<TokenStore>,
    grants: Arc<dyn GrantStore>,
    membership: Arc<MembershipGate>,
    preauth_ttl: Duration,
}

impl std::fmt::Debug for AuthorizationHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationHierarchy")
            .field("system_tier", &!self.shared_secret.is_empty())
            .field("membership", &self.membership)
            .field("preauth_ttl", &self.preauth_ttl)
            .finish_non_exhaustive()
    }
}

impl AuthorizationHierarchy {
    /// Create a hierarchy. An empty `shared_secret` disables the system tier.
    pub fn new(
        shared_secret: &str,
        tokens: Arc<TokenStore>,
        grants: Arc<dyn GrantStore>,
        membership: Arc<MembershipGate>,
    ) -> Self {
        Self {
            shared_secret: Zeroizing::new(shared_secret.to_string()),
            tokens,
            grants,
            membership,
            preauth_ttl: DEFAULT_PREAUTH_TTL,
        }
    }

    /// Override the lifetime of grants made by the pre-authorize flows.
    pub fn with_preauth_ttl(mut self, ttl: Duration) -> Self {
        self.preauth_ttl = ttl;
        self
    }

    /// The token store behind tier 3.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The membership gate behind tier 2.
    pub fn membership(&self) -> &Arc<MembershipGate> {
        &self.membership
    }

    /// Constant-time comparison against the configured secret.
    pub fn is_system_secret(&self, candidate: &str) -> bool {
        if self.shared_secret.is_empty() {
            return false;
        }
        candidate
            .as_bytes()
            .ct_eq(self.shared_secret.as_bytes())
            .into()
    }

    /// Resolve credentials to a principal.
    ///
    /// # Errors
    ///
    /// `Unauthorized` if no source accepts. `InvalidArgument` if membership
    /// is enabled and an explicitly presented public key is malformed.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        let token = credentials.token.as_deref().filter(|t| !t.is_empty());
        let public_key = credentials.public_key.as_deref().filter(|k| !k.is_empty());

        // 1. System secret
        if token.is_some_and(|t| self.is_system_secret(t)) {
            tracing::debug!("Authenticated with system secret");
            return Ok(Principal::system());
        }

        // 2. On-chain membership
        if self.membership.is_enabled() {
            if let Some(principal) = self.authenticate_onchain(public_key, token).await? {
                return Ok(principal);
            }
        }

        // 3. Bearer token
        if let Some(token) = token {
            if let Some(principal) = self.tokens.validate(token).await {
                tracing::debug!("Authenticated bearer token for {:?}", principal.user_id);
                return Ok(principal);
            }
        }

        // 4. Pre-authorization grant
        let keys = public_key.into_iter().chain(token);
        for candidate in keys.filter(|c| !looks_like_signed_token(c)) {
            if self.grants.is_authorized(candidate) {
                tracing::debug!("Authenticated via pre-authorization grant");
                return Ok(Principal::user(
                    strip_key(candidate),
                    TrustSource::Preauthorized,
                ));
            }
        }

        tracing::debug!("No trust source accepted the presented credentials");
        Err(GatewayError::Unauthorized(
            "no valid credentials presented".to_string(),
        ))
    }

    async fn authenticate_onchain(
        &self,
        public_key: Option<&str>,
        token: Option<&str>,
    ) -> Result<Option<Principal>> {
        let (key, explicit) = match (public_key, token) {
            (Some(key), _) => (key, true),
            (None, Some(token)) if !looks_like_signed_token(token) => (token, false),
            _ => return Ok(None),
        };

        match self.membership.check(key).await {
            Ok(MembershipVerdict::Authorized) => {
                tracing::debug!("Authenticated key {} on-chain", strip_key(key));
                Ok(Some(Principal::user(strip_key(key), TrustSource::Onchain)))
            }
            Ok(_) => Ok(None),
            Err(e @ GatewayError::InvalidArgument(_)) if explicit => Err(e),
            Err(e) => {
                tracing::debug!("Skipping on-chain tier: {}", e);
                Ok(None)
            }
        }
    }

    /// Whether an inbound wire write carries an acceptable credential.
    ///
    /// Synchronous: checks the system secret in `headers.token` and the
    /// top-level `token`, then the grant cache. Never calls the membership
    /// registry.
    pub fn admit_write(&self, message: &WireMessage) -> bool {
        message
            .presented_tokens()
            .any(|token| self.is_system_secret(token) || self.has_grant(token))
    }

    fn has_grant(&self, value: &str) -> bool {
        if !looks_like_signed_token(value) {
            return self.grants.is_authorized(value);
        }
        // Signature and expiry only; revocation removes the grant itself
        self.tokens
            .claims(value)
            .is_some_and(|claims| self.grants.is_authorized(&token_grant_key(&claims.token_id)))
    }

    /// Require the admin role on an already authenticated principal.
    ///
    /// # Errors
    ///
    /// `Forbidden` for principals that are neither system nor admin.
    pub fn require_admin(&self, principal: &Principal) -> Result<()> {
        if principal.is_admin() {
            Ok(())
        } else {
            Err(GatewayError::Forbidden("admin privileges required".to_string()))
        }
    }

    /// Store a grant under every textual variant of `key`, sharing one expiry.
    pub fn grant_key(&self, key: &str, ttl: Duration) -> PreAuthorizedKey {
        let expires_at = deadline_after(ttl).unwrap_or(i64::MAX);
        let mut grant = PreAuthorizedKey { expires_at };
        for variant in key_variants(key) {
            grant = self.grants.grant_until(&variant, expires_at);
        }
        grant
    }

    /// Pre-authorize a public key for wire writes.
    ///
    /// `force_secret` is the value of the override header when the caller
    /// asked to force the grant.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or malformed key, `Unauthorized` for a
    /// forced request with the wrong secret, `Forbidden` when no relay
    /// authorizes the key, `NotFound` when no relays are registered and
    /// `Unavailable` when the registry cannot be reached.
    pub async fn pre_authorize_key(
        &self,
        key: &str,
        force_secret: Option<&str>,
    ) -> Result<PreAuthorization> {
        let key = key.trim();
        if strip_key(key).is_empty() {
            return Err(GatewayError::InvalidArgument("public key is required".to_string()));
        }
        if looks_like_signed_token(key) || strip_key(key).starts_with(TOKEN_GRANT_PREFIX) {
            return Err(GatewayError::InvalidArgument(
                "signed tokens are pre-authorized through /pre-authorize-token".to_string(),
            ));
        }

        if let Some(existing) = self.grants.get(key) {
            return Ok(PreAuthorization {
                pub_key: key.to_string(),
                expires_at: existing.expires_at,
                outcome: PreAuthOutcome::AlreadyAuthorized,
            });
        }

        if let Some(secret) = force_secret {
            if !self.is_system_secret(secret) {
                return Err(GatewayError::Unauthorized(
                    "force requires the system secret".to_string(),
                ));
            }
            let grant = self.grant_key(key, self.preauth_ttl);
            tracing::warn!(
                "FORCED pre-authorization of key {} without membership proof",
                key
            );
            self.record_override(key, grant.expires_at).await;
            return Ok(PreAuthorization {
                pub_key: key.to_string(),
                expires_at: grant.expires_at,
                outcome: PreAuthOutcome::Forced,
            });
        }

        if !self.membership.is_enabled() {
            let grant = self.grant_key(key, self.preauth_ttl);
            tracing::info!(
                "Membership verification disabled, pre-authorized key {} without proof",
                key
            );
            return Ok(PreAuthorization {
                pub_key: key.to_string(),
                expires_at: grant.expires_at,
                outcome: PreAuthOutcome::Open,
            });
        }

        match self.membership.check(key).await? {
            MembershipVerdict::Authorized => {
                let grant = self.grant_key(key, self.preauth_ttl);
                tracing::info!("Pre-authorized key {} after membership check", key);
                Ok(PreAuthorization {
                    pub_key: key.to_string(),
                    expires_at: grant.expires_at,
                    outcome: PreAuthOutcome::Verified,
                })
            }
            MembershipVerdict::NotAuthorized => Err(GatewayError::Forbidden(
                "key is not authorized on any relay".to_string(),
            )),
            MembershipVerdict::NoRelays => {
                Err(GatewayError::NotFound("no relays registered".to_string()))
            }
            MembershipVerdict::Unreachable => Err(GatewayError::Unavailable(
                "membership registry unreachable".to_string(),
            )),
        }
    }

    /// Pre-authorize a signed bearer token for wire writes.
    ///
    /// The grant is keyed by the token's id; key variants do not apply to
    /// tokens. It lasts until `ttl` elapses or the token is revoked through
    /// [`AuthorizationHierarchy::revoke_token`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty token or a `ttl` that is zero or too
    /// large to represent, `Forbidden` if the token does not validate.
    pub async fn pre_authorize_token(
        &self,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<PreAuthorizedKey> {
        if token.trim().is_empty() {
            return Err(GatewayError::InvalidArgument("token is required".to_string()));
        }
        let ttl = ttl.unwrap_or(self.preauth_ttl);
        if ttl.is_zero() {
            return Err(GatewayError::InvalidArgument("ttlSeconds must be positive".to_string()));
        }
        let expires_at = deadline_after(ttl)
            .ok_or_else(|| GatewayError::InvalidArgument("ttlSeconds is out of range".to_string()))?;

        if self.tokens.validate(token).await.is_none() {
            return Err(GatewayError::Forbidden("token is not valid".to_string()));
        }
        let Some(claims) = self.tokens.claims(token) else {
            return Err(GatewayError::Forbidden("token is not valid".to_string()));
        };

        let grant = self
            .grants
            .grant_until(&token_grant_key(&claims.token_id), expires_at);
        tracing::info!(
            "Pre-authorized token {} of user {} until {}",
            claims.token_id,
            claims.user_id,
            grant.expires_at
        );
        Ok(grant)
    }

    /// Revoke a token and drop any wire grant made for it.
    ///
    /// The grant is dropped even when storage does not acknowledge the
    /// revocation in time.
    ///
    /// # Errors
    ///
    /// As [`TokenStore::revoke`].
    pub async fn revoke_token(&self, user_id: &str, token_id: &TokenId) -> Result<bool> {
        let acknowledged = self.tokens.revoke(user_id, token_id).await?;
        if self.grants.remove(&token_grant_key(&token_id.to_string())) {
            tracing::info!("Dropped pre-authorization of revoked token {:?}", token_id);
        }
        Ok(acknowledged)
    }

    async fn record_override(&self, key: &str, expires_at: i64) {
        let now = now_millis();
        let soul = format!("{OVERRIDES_ROOT}/{now}-{}", TokenId::random());

        let mut record = Node::new();
        record.insert("pubKey".into(), key.into());
        record.insert("variants".into(), key_variants(key).into());
        record.insert("expiresAt".into(), expires_at.into());
        record.insert("createdAt".into(), now.into());

        if let Err(e) = self.tokens.graph().put_node(&soul, record).await {
            tracing::warn!("Failed to persist forced pre-authorization record: {}", e);
        }
    }
}

/// Signed tokens have three dot-separated segments; keys have at most two.
fn looks_like_signed_token(value: &str) -> bool {
    value.split('.').count() == 3
}

fn token_grant_key(token_id: &str) -> String {
    format!("{TOKEN_GRANT_PREFIX}{token_id}")
}
