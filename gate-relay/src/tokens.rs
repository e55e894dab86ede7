//! Bearer token issuance, listing, revocation and validation.
//!
//! Tokens are HS256 JWTs whose claims name the owner and the token id. The
//! JWT alone is not enough to be valid: the matching record must exist in the
//! graph, be unrevoked and unexpired. Records are revoked in place and never
//! deleted.
//!
//! Graph layout:
//! - `tokens/<userId>/<tokenId>` holds the full [`Token`] record.
//! - `token-index/<tokenId>` holds `{userId, tokenId}` for lookups by id alone.

use crate::clock::{deadline_after, now_millis};
use crate::error::{GatewayError, StorageError};
use crate::storage::{GraphStore, Node};
use gate_types::{Principal, TokenId, TrustSource};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const TOKENS_ROOT: &str = "tokens";
const INDEX_ROOT: &str = "token-index";
const DEFAULT_TOKEN_NAME: &str = "API Token";

/// An issued bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// Random identifier, unique per owner.
    pub id: TokenId,
    /// Signed token value. Masked everywhere except in the creation response.
    pub token: String,
    /// Human label.
    pub name: String,
    /// Owner.
    pub user_id: String,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
    /// Expiry time, Unix milliseconds.
    pub expires_at: i64,
    /// Last successful validation, Unix milliseconds.
    #[serde(default)]
    pub last_used_at: Option<i64>,
    /// Permanently inert once set.
    #[serde(default)]
    pub revoked: bool,
}

impl Token {
    fn is_live(&self, now: i64) -> bool {
        !self.revoked && now < self.expires_at
    }
}

/// Claims embedded in the signed token value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Owner.
    pub user_id: String,
    /// Token record id.
    pub token_id: String,
    /// Human label.
    pub name: String,
    /// Issued at, Unix seconds.
    pub iat: i64,
    /// Expires at, Unix seconds.
    pub exp: i64,
}

/// Mask a token value to `first4...last4`.
pub fn mask_token(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "...".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn token_soul(user_id: &str, token_id: &TokenId) -> String {
    format!("{TOKENS_ROOT}/{user_id}/{token_id}")
}

fn index_soul(token_id: &TokenId) -> String {
    format!("{INDEX_ROOT}/{token_id}")
}

fn to_node<T: Serialize>(value: &T) -> Result<Node, StorageError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Ok(Node::new()),
    }
}

/// Persists issued tokens against the backing graph.
pub struct TokenStore {
    graph: Arc<dyn GraphStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    default_ttl: Duration,
    list_timeout: Duration,
    revoke_timeout: Duration,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("default_ttl", &self.default_ttl)
            .field("list_timeout", &self.list_timeout)
            .field("revoke_timeout", &self.revoke_timeout)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Create a token store over a graph, signing with an HS256 secret.
    pub fn new(graph: Arc<dyn GraphStore>, signing_key: &[u8]) -> Self {
        Self {
            graph,
            encoding_key: EncodingKey::from_secret(signing_key),
            decoding_key: DecodingKey::from_secret(signing_key),
            default_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            list_timeout: Duration::from_secs(2),
            revoke_timeout: Duration::from_secs(3),
        }
    }

    /// Override the lifetime used when `create` is given no expiry.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Override the list and revoke bounds.
    pub fn with_timeouts(mut self, list: Duration, revoke: Duration) -> Self {
        self.list_timeout = list;
        self.revoke_timeout = revoke;
        self
    }

    /// The backing graph.
    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Issue a token for `user_id`.
    ///
    /// `expires_at` is Unix milliseconds; it defaults to the configured TTL
    /// from now. The returned record carries the plaintext signed value,
    /// which is never returned again.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty owner or a past expiry; storage errors
    /// from the primary record write are surfaced. A failed index write is
    /// only logged.
    pub async fn create(
        &self,
        user_id: &str,
        name: Option<&str>,
        expires_at: Option<i64>,
    ) -> Result<Token, GatewayError> {
        if user_id.trim().is_empty() {
            return Err(GatewayError::InvalidArgument("userId is required".to_string()));
        }
        if user_id.contains('/') {
            return Err(GatewayError::InvalidArgument(
                "userId must not contain '/'".to_string(),
            ));
        }

        let now = now_millis();
        let expires_at = expires_at
            .or_else(|| deadline_after(self.default_ttl))
            .unwrap_or(i64::MAX);
        if expires_at <= now {
            return Err(GatewayError::InvalidArgument(
                "expiresAt must be in the future".to_string(),
            ));
        }

        let id = TokenId::random();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_TOKEN_NAME)
            .to_string();

        let claims = TokenClaims {
            user_id: user_id.to_string(),
            token_id: id.to_string(),
            name: name.clone(),
            iat: now / 1000,
            exp: expires_at / 1000,
        };
        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;

        let record = Token {
            id,
            token: value,
            name,
            user_id: user_id.to_string(),
            created_at: now,
            expires_at,
            last_used_at: None,
            revoked: false,
        };

        self.graph
            .put_node(&token_soul(user_id, &id), to_node(&record)?)
            .await?;

        let mut index = Node::new();
        index.insert("userId".into(), user_id.into());
        index.insert("tokenId".into(), id.to_string().into());
        if let Err(e) = self.graph.put_node(&index_soul(&id), index).await {
            tracing::warn!("Token index write failed for {:?}: {}", id, e);
        }

        tracing::info!("Created token {:?} for user {}", id, user_id);
        Ok(record)
    }

    /// All tokens owned by `user_id`, oldest first, with values masked.
    ///
    /// # Errors
    ///
    /// Storage errors, or a storage timeout if the read does not complete
    /// within the list bound.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Token>, GatewayError> {
        let parent = format!("{TOKENS_ROOT}/{user_id}");
        let children = tokio::time::timeout(self.list_timeout, self.graph.children(&parent))
            .await
            .map_err(|_| StorageError::Timeout {
                operation: "list",
                millis: self.list_timeout.as_millis(),
            })??;

        let mut tokens: Vec<Token> = children
            .into_iter()
            .filter_map(|(key, node)| {
                match serde_json::from_value::<Token>(serde_json::Value::Object(node)) {
                    Ok(mut token) => {
                        token.token = mask_token(&token.token);
                        Some(token)
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed token record {}/{}: {}", parent, key, e);
                        None
                    }
                }
            })
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        Ok(tokens)
    }

    /// Mark a token revoked.
    ///
    /// Idempotent: revoking an already revoked token succeeds again. Returns
    /// `Ok(false)` when the store does not acknowledge within the revoke bound.
    ///
    /// # Errors
    ///
    /// `NotFound` if the owner has no such token; storage errors are surfaced.
    pub async fn revoke(&self, user_id: &str, token_id: &TokenId) -> Result<bool, GatewayError> {
        let soul = token_soul(user_id, token_id);
        let write = async {
            if self.graph.get_node(&soul).await?.is_none() {
                return Err(GatewayError::NotFound(format!("token {token_id}")));
            }
            let mut patch = Node::new();
            patch.insert("revoked".into(), true.into());
            self.graph.put_node(&soul, patch).await?;
            Ok::<(), GatewayError>(())
        };

        match tokio::time::timeout(self.revoke_timeout, write).await {
            Ok(Ok(())) => {
                tracing::info!("Revoked token {:?} for user {}", token_id, user_id);
                Ok(true)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(
                    "Revocation of {:?} not acknowledged within {:?}",
                    token_id,
                    self.revoke_timeout
                );
                Ok(false)
            }
        }
    }

    /// Resolve a token by id alone through the global index.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub async fn find(&self, token_id: &TokenId) -> Result<Option<Token>, GatewayError> {
        let Some(index) = self.graph.get_node(&index_soul(token_id)).await? else {
            return Ok(None);
        };
        let Some(user_id) = index.get("userId").and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        self.load(user_id, token_id).await
    }

    async fn load(&self, user_id: &str, token_id: &TokenId) -> Result<Option<Token>, GatewayError> {
        match self.graph.get_node(&token_soul(user_id, token_id)).await? {
            Some(node) => {
                let token = serde_json::from_value(serde_json::Value::Object(node))
                    .map_err(StorageError::from)?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Verify the signature and expiry of a signed token value and return
    /// its claims. Does not consult the graph, so revocation is not seen.
    pub fn claims(&self, value: &str) -> Option<TokenClaims> {
        let validation = Validation::new(Algorithm::HS256);
        match decode::<TokenClaims>(value, &self.decoding_key, &validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                tracing::debug!("Token decode failed: {}", e);
                None
            }
        }
    }

    /// Decode, verify and look up a signed token value.
    ///
    /// Returns `None` for every kind of failure: bad signature, malformed
    /// claims, unknown record, revoked or expired. On success the record's
    /// `lastUsedAt` is refreshed in the background.
    pub async fn validate(&self, value: &str) -> Option<Principal> {
        let claims = self.claims(value)?;

        let token_id: TokenId = claims.token_id.parse().ok()?;
        let record = match self.load(&claims.user_id, &token_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::debug!("No record for token {:?}", token_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Token lookup failed for {:?}: {}", token_id, e);
                return None;
            }
        };

        let now = now_millis();
        if !record.is_live(now) {
            tracing::debug!("Token {:?} is revoked or expired", token_id);
            return None;
        }

        let graph = self.graph.clone();
        let soul = token_soul(&claims.user_id, &token_id);
        tokio::spawn(async move {
            let mut patch = Node::new();
            patch.insert("lastUsedAt".into(), now.into());
            if let Err(e) = graph.put_node(&soul, patch).await {
                tracing::debug!("Failed to record token use for {}: {}", soul, e);
            }
        });

        Some(Principal::user(claims.user_id, TrustSource::Jwt))
    }
}
