//! Authorization results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which trust source granted a [`Principal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustSource {
    /// The caller presented the configured shared secret
    System,
    /// A signed bearer token issued by the token store
    Jwt,
    /// On-chain membership verification
    Onchain,
    /// A live pre-authorization grant
    Preauthorized,
}

impl fmt::Display for TrustSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::Jwt => "jwt",
            Self::Onchain => "onchain",
            Self::Preauthorized => "preauthorized",
        };
        f.write_str(s)
    }
}

/// The resolved identity of a caller after a successful authorization decision.
///
/// Value object, built fresh per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// True only for holders of the shared secret
    pub is_system_token: bool,
    /// Owner identity, when the source carries one
    pub user_id: Option<String>,
    /// Ordered role names
    pub permissions: Vec<String>,
    /// Trust source that granted access
    pub source: TrustSource,
}

impl Principal {
    /// The principal granted to holders of the shared secret.
    pub fn system() -> Self {
        Self {
            is_system_token: true,
            user_id: None,
            permissions: vec!["admin".to_string(), "system".to_string()],
            source: TrustSource::System,
        }
    }

    /// A regular user principal with the default `["user"]` permissions.
    pub fn user(user_id: impl Into<String>, source: TrustSource) -> Self {
        Self {
            is_system_token: false,
            user_id: Some(user_id.into()),
            permissions: vec!["user".to_string()],
            source,
        }
    }

    /// Whether this principal carries the named permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Whether this principal may use administrative endpoints.
    pub fn is_admin(&self) -> bool {
        self.is_system_token || self.has_permission("admin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_principal_is_admin() {
        let p = Principal::system();
        assert!(p.is_system_token);
        assert!(p.is_admin());
        assert_eq!(p.permissions, vec!["admin", "system"]);
        assert_eq!(p.source, TrustSource::System);
    }

    #[test]
    fn user_principal_defaults() {
        let p = Principal::user("u1", TrustSource::Jwt);
        assert!(!p.is_admin());
        assert_eq!(p.permissions, vec!["user"]);
        assert_eq!(p.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn admin_permission_without_system_flag() {
        let mut p = Principal::user("ops", TrustSource::Onchain);
        p.permissions.push("admin".into());
        assert!(p.is_admin());
    }

    #[test]
    fn principal_serializes_camel_case() {
        let json = serde_json::to_value(Principal::user("u1", TrustSource::Preauthorized)).unwrap();
        assert_eq!(json["isSystemToken"], false);
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["source"], "preauthorized");
    }
}
