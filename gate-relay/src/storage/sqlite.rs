//! SQLite storage backend for the token graph.

use super::{split_soul, GraphStore, Node};
use crate::clock::now_millis;
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based graph storage.
///
/// Uses WAL mode for concurrent reads/writes. Node bodies are JSON text and
/// merges use SQLite's `json_patch`, so a put never reads back first.
#[derive(Clone)]
pub struct SqliteGraph {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraph").finish_non_exhaustive()
    }
}

impl SqliteGraph {
    /// Open a SQLite graph at a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(path.to_str().unwrap_or("gate.db"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let graph = Self { pool };
        graph.run_migrations().await?;
        Ok(graph)
    }

    /// Create an in-memory SQLite graph (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let graph = Self { pool };
        graph.run_migrations().await?;
        Ok(graph)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                soul TEXT PRIMARY KEY,
                parent TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl GraphStore for SqliteGraph {
    async fn put_node(&self, soul: &str, fields: Node) -> Result<(), StorageError> {
        let (parent, _) = split_soul(soul);
        let data = serde_json::to_string(&fields)?;

        sqlx::query(
            r#"
            INSERT INTO nodes (soul, parent, data, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(soul) DO UPDATE SET
                data = json_patch(nodes.data, excluded.data),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(soul)
        .bind(parent)
        .bind(data)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_node(&self, soul: &str) -> Result<Option<Node>, StorageError> {
        let data: Option<String> = sqlx::query_scalar("SELECT data FROM nodes WHERE soul = ?1")
            .bind(soul)
            .fetch_optional(&self.pool)
            .await?;

        match data {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn children(&self, parent: &str) -> Result<Vec<(String, Node)>, StorageError> {
        let rows = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT soul, data
            FROM nodes
            WHERE parent = ?1
            ORDER BY soul ASC
            "#,
        )
        .bind(parent)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let (_, key) = split_soul(&row.soul);
                Ok((key.to_string(), serde_json::from_str(&row.data)?))
            })
            .collect()
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct NodeRow {
    soul: String,
    data: String,
}
