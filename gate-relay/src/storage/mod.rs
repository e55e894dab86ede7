//! Storage layer for gate-relay.
//!
//! Tokens live in a key-value graph: every node is a JSON object addressed by
//! a slash-separated soul, and writes merge fields into the existing node
//! rather than replacing it.

mod sqlite;

pub use sqlite::SqliteGraph;

use crate::error::StorageError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Body of a graph node.
pub type Node = Map<String, Value>;

/// Split a soul into its parent soul and final segment.
///
/// Top-level souls have an empty parent.
pub fn split_soul(soul: &str) -> (&str, &str) {
    soul.rsplit_once('/').unwrap_or(("", soul))
}

/// Trait for graph storage backends.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge `fields` into the node at `soul`, creating the node if needed.
    ///
    /// Returns once the backend has acknowledged the write.
    async fn put_node(&self, soul: &str, fields: Node) -> Result<(), StorageError>;

    /// Read the node at `soul`.
    async fn get_node(&self, soul: &str) -> Result<Option<Node>, StorageError>;

    /// Read every direct child of `parent`, keyed by its final soul segment.
    async fn children(&self, parent: &str) -> Result<Vec<(String, Node)>, StorageError>;
}
