//! SQLite-backed key store
//!
//! A single `api_keys` table keyed by the API key itself. Timestamps are stored as epoch
//! milliseconds so they never need parsing on the hot path.
use crate::traits::{ApiKeyRecord, KeyStore, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS api_keys (
    key TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    last_used INTEGER NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 10,
    rate_limit INTEGER NOT NULL DEFAULT 10,
    active INTEGER NOT NULL DEFAULT 1,
    description TEXT
)";

const COLUMNS: &str = "key, created_at, last_used, tokens, rate_limit, active, description";

#[derive(Debug, Clone)]
pub struct SqliteKeyStore {
    /// rusqlite connections are not `Sync`; every statement runs under this lock.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKeyStore {
    /// Open (or create) the key database at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened key database {} (journal_mode={})", path.display(), mode);

        let store = Self::with_connection(conn)?;
        info!("Connected to key database {}", path.display());
        Ok(store)
    }

    /// A throwaway database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKeyRecord> {
    Ok(ApiKeyRecord {
        key: row.get(0)?,
        created_at: row.get(1)?,
        last_used: row.get(2)?,
        tokens: row.get(3)?,
        rate_limit: row.get(4)?,
        active: row.get(5)?,
        description: row.get(6)?,
    })
}

/// Map "zero rows touched" onto `NotFound`.
fn expect_one(updated: usize, key: &str) -> Result<(), StoreError> {
    if updated == 0 {
        Err(StoreError::NotFound(key.to_string()))
    } else {
        Ok(())
    }
}

#[async_trait]
impl KeyStore for SqliteKeyStore {
    async fn lookup(&self, key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM api_keys WHERE key = ?1"),
                params![key],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    async fn consume_token(
        &self,
        key: &str,
        tokens: i64,
        last_used: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE api_keys SET tokens = ?1, last_used = ?2 WHERE key = ?3",
            params![tokens, last_used, key],
        )?;
        expect_one(updated, key)
    }

    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO api_keys ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(key) DO NOTHING"
            ),
            params![
                record.key,
                record.created_at,
                record.last_used,
                record.tokens,
                record.rate_limit,
                record.active,
                record.description,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::Duplicate(record.key.clone()));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM api_keys ORDER BY created_at, key"
        ))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM api_keys WHERE key = ?1", params![key])?;
        expect_one(removed, key)
    }

    async fn set_active(&self, key: &str, active: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE api_keys SET active = ?1 WHERE key = ?2",
            params![active, key],
        )?;
        expect_one(updated, key)
    }

    async fn set_rate_limit(&self, key: &str, rate_limit: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE api_keys SET rate_limit = ?1 WHERE key = ?2",
            params![rate_limit, key],
        )?;
        expect_one(updated, key)
    }
}
