//! Key storage trait for the admission path
//!
//! The gateway looks keys up and writes back token counts through this trait. Key management
//! (creating, removing, activating, re-limiting keys) goes through the same store.

use async_trait::async_trait;
use bon::Builder;

/// Tokens granted per window when a key is created without an explicit limit.
pub const DEFAULT_RATE_LIMIT: i64 = 10;

/// A persisted API key and its rate-limit state.
///
/// Timestamps are milliseconds since the unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ApiKeyRecord {
    #[builder(into)]
    pub key: String,
    #[builder(default)]
    pub created_at: i64,
    #[builder(default)]
    pub last_used: i64,
    #[builder(default = DEFAULT_RATE_LIMIT)]
    pub tokens: i64,
    #[builder(default = DEFAULT_RATE_LIMIT)]
    pub rate_limit: i64,
    #[builder(default = true)]
    pub active: bool,
    #[builder(into)]
    pub description: Option<String>,
}

impl ApiKeyRecord {
    /// A fresh, active key with a full window of tokens, created at `now`.
    pub fn new(key: impl Into<String>, rate_limit: i64, now: i64) -> Self {
        ApiKeyRecord::builder()
            .key(key)
            .created_at(now)
            .last_used(now)
            .tokens(rate_limit)
            .rate_limit(rate_limit)
            .build()
    }
}

/// Error type for key store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No key matches
    #[error("API key not found: {0}")]
    NotFound(String),
    /// Inserting a key that already exists
    #[error("API key already exists: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

/// Durable storage for API keys.
///
/// `lookup` and `consume_token` form the contract the admission path relies on: they must be
/// safe to call concurrently for different keys. Everything else is administrative.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    /// Fetch a key's record, or `None` if the key is unknown.
    async fn lookup(&self, key: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Persist a key's token count and last-consumption time.
    ///
    /// # Returns
    /// * `Ok(())` - The row was updated
    /// * `Err(StoreError::NotFound)` - If the key no longer exists
    async fn consume_token(&self, key: &str, tokens: i64, last_used: i64)
    -> Result<(), StoreError>;

    /// Add a new key. Fails with `StoreError::Duplicate` if it already exists.
    async fn insert(&self, record: &ApiKeyRecord) -> Result<(), StoreError>;

    /// All keys, oldest first.
    async fn list(&self) -> Result<Vec<ApiKeyRecord>, StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    async fn set_active(&self, key: &str, active: bool) -> Result<(), StoreError>;

    /// Change the tokens granted per window. The remaining token count is left alone, so the
    /// new limit applies from the next refill.
    async fn set_rate_limit(&self, key: &str, rate_limit: i64) -> Result<(), StoreError>;
}
