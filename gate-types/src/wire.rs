//! The sync protocol envelope seen by the wire guard.
//!
//! Wire messages are JSON objects. A read carries `get`, a write carries
//! `put` keyed by soul. Credentials ride in `headers.token`, a top-level
//! `token`, or `headers.Authorization = "Bearer <secret>"`. Fields the gateway
//! does not interpret are preserved untouched so the sync engine receives
//! exactly what the peer sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::TypesError;

/// Soul prefix reserved for the sync engine's user public-key records.
///
/// Covers both `~<pubkey>` and `~@<alias>` souls.
pub const IDENTITY_MARKER: &str = "~";

/// Maximum length of [`WireMessage::summary`] output.
const SUMMARY_MAX_LEN: usize = 200;

/// Whether a soul names an internal identity record.
pub fn is_identity_soul(soul: &str) -> bool {
    soul.starts_with(IDENTITY_MARKER) && soul.len() > IDENTITY_MARKER.len()
}

/// Direction of a wire message for audit purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Read request
    Get,
    /// Write
    Put,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Put => f.write_str("PUT"),
        }
    }
}

/// Header map carried by a wire message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireHeaders {
    /// Bearer credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// HTTP-style `Bearer <credential>` header
    #[serde(
        rename = "Authorization",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization: Option<String>,
    /// Headers the gateway does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single unit of sync protocol traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message id used by peers to correlate acknowledgements
    #[serde(rename = "#", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Read request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<Value>,
    /// Write body keyed by soul
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put: Option<Map<String, Value>>,
    /// Header map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<WireHeaders>,
    /// Top-level bearer credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Fields the gateway does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireMessage {
    /// Build a write for the given souls.
    pub fn put(nodes: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            put: Some(nodes.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Build a read for a single soul.
    pub fn get(soul: &str) -> Self {
        let mut body = Map::new();
        body.insert("#".to_string(), Value::String(soul.to_string()));
        Self {
            get: Some(Value::Object(body)),
            ..Default::default()
        }
    }

    /// Parse a message from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Serialize the message to JSON text.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Whether this message writes to the graph.
    pub fn is_write(&self) -> bool {
        self.put.is_some()
    }

    /// Audit direction, or `None` for control traffic with neither `get` nor `put`.
    pub fn direction(&self) -> Option<Direction> {
        if self.put.is_some() {
            Some(Direction::Put)
        } else if self.get.is_some() {
            Some(Direction::Get)
        } else {
            None
        }
    }

    /// Souls targeted by a write, in key order.
    pub fn souls(&self) -> impl Iterator<Item = &str> {
        self.put.iter().flat_map(|put| put.keys().map(String::as_str))
    }

    /// True if this is a non-empty write touching only identity records.
    pub fn is_identity_write(&self) -> bool {
        match &self.put {
            Some(put) if !put.is_empty() => put.keys().all(|soul| is_identity_soul(soul)),
            _ => false,
        }
    }

    /// Credentials presented in the `headers.token` and top-level `token` fields.
    pub fn presented_tokens(&self) -> impl Iterator<Item = &str> {
        self.headers
            .as_ref()
            .and_then(|h| h.token.as_deref())
            .into_iter()
            .chain(self.token.as_deref())
    }

    /// Attach a credential under all three header conventions.
    pub fn stamp_token(&mut self, token: &str) {
        let headers = self.headers.get_or_insert_with(WireHeaders::default);
        headers.token = Some(token.to_string());
        headers.authorization = Some(format!("Bearer {token}"));
        self.token = Some(token.to_string());
    }

    /// Short human-readable description for audit logging.
    ///
    /// Never contains credentials; truncated to a fixed length.
    pub fn summary(&self) -> String {
        let mut out = match self.direction() {
            Some(Direction::Put) => {
                let souls: Vec<&str> = self.souls().collect();
                format!("{} soul(s): {}", souls.len(), souls.join(", "))
            }
            Some(Direction::Get) => match self.get.as_ref().and_then(|g| g.get("#")) {
                Some(Value::String(soul)) => soul.clone(),
                _ => "<query>".to_string(),
            },
            None => "<control>".to_string(),
        };
        if out.len() > SUMMARY_MAX_LEN {
            let mut end = SUMMARY_MAX_LEN;
            while !out.is_char_boundary(end) {
                end -= 1;
            }
            out.truncate(end);
            out.push_str("...");
        }
        out
    }
}
