//! Durable conversation-list storage
//!
//! The whole conversation list is persisted as one JSON payload (timestamps
//! as ISO-8601 strings) under a fixed store key. SQLite is the durable
//! backend; when it cannot be opened the app degrades to an in-memory store
//! instead of failing to start.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::StorageConfig;
use crate::conversation::Conversation;
use crate::error::AppError;

/// Durable save/load/clear of the conversation list.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_chats(&self, chats: &[Conversation]) -> Result<(), AppError>;

    /// Full list, or empty when nothing has been saved yet.
    async fn load_chats(&self) -> Result<Vec<Conversation>, AppError>;

    async fn clear_chats(&self) -> Result<(), AppError>;
}

/// SQLite-backed storage.
pub struct SqliteStorage {
    pool: SqlitePool,
    store_name: String,
}

impl SqliteStorage {
    /// Open (or create) the database at the configured path.
    pub async fn new(config: &StorageConfig) -> Result<Self, AppError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", config.db_path.display()))?
                .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let storage = Self {
            pool,
            store_name: config.store_name.clone(),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory database for testing.
    pub async fn new_in_memory(store_name: impl Into<String>) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self {
            pool,
            store_name: store_name.into(),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_store (
                store_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_chats(&self, chats: &[Conversation]) -> Result<(), AppError> {
        let payload =
            serde_json::to_string(chats).map_err(|e| AppError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO chat_store (store_key, payload)
            VALUES (?, ?)
            ON CONFLICT(store_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = datetime('now')
            "#,
        )
        .bind(&self.store_name)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_chats(&self) -> Result<Vec<Conversation>, AppError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM chat_store WHERE store_key = ?")
                .bind(&self.store_name)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((payload,)) => {
                serde_json::from_str(&payload).map_err(|e| AppError::Storage(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn clear_chats(&self) -> Result<(), AppError> {
        sqlx::query("DELETE FROM chat_store WHERE store_key = ?")
            .bind(&self.store_name)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Degraded fallback: keeps the list only in memory.
#[derive(Default)]
pub struct MemoryStorage {
    chats: Mutex<Vec<Conversation>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_chats(&self, chats: &[Conversation]) -> Result<(), AppError> {
        *self.chats.lock().expect("memory storage lock poisoned") = chats.to_vec();
        Ok(())
    }

    async fn load_chats(&self) -> Result<Vec<Conversation>, AppError> {
        Ok(self
            .chats
            .lock()
            .expect("memory storage lock poisoned")
            .clone())
    }

    async fn clear_chats(&self) -> Result<(), AppError> {
        self.chats
            .lock()
            .expect("memory storage lock poisoned")
            .clear();
        Ok(())
    }
}

/// Open durable storage, falling back to in-memory when SQLite is unavailable.
pub async fn open(config: &StorageConfig) -> Arc<dyn Storage> {
    match SqliteStorage::new(config).await {
        Ok(storage) => Arc::new(storage),
        Err(err) => {
            tracing::warn!(
                error = %err,
                "failed to open durable storage, keeping chats in memory only"
            );
            Arc::new(MemoryStorage::new())
        }
    }
}
