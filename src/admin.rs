//! Key management operations behind the CLI subcommands
//!
//! These run against the key store directly; a running gateway sees the results on its next
//! lookup of the key (activation immediately, limit changes at the key's next refill).
use crate::auth::{generate_key, redact};
use crate::clock::Clock;
use crate::traits::{ApiKeyRecord, KeyStore, StoreError};
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{info, warn};

/// Create a key with a freshly generated secret and a full window of tokens.
pub async fn create_key(
    store: &dyn KeyStore,
    clock: &dyn Clock,
    rate_limit: i64,
    description: Option<String>,
) -> Result<ApiKeyRecord, StoreError> {
    let mut record = ApiKeyRecord::new(generate_key(), rate_limit, clock.now_millis());
    record.description = description;
    store.insert(&record).await?;
    info!("Generated new API key {}", redact(&record.key));
    Ok(record)
}

/// Register a caller-chosen key.
pub async fn add_key(
    store: &dyn KeyStore,
    clock: &dyn Clock,
    key: &str,
    rate_limit: i64,
    description: Option<String>,
) -> Result<ApiKeyRecord, StoreError> {
    warn!("Adding your own keys may be unsafe; prefer generated keys");
    let mut record = ApiKeyRecord::new(key, rate_limit, clock.now_millis());
    record.description = description;
    store.insert(&record).await?;
    info!("Added API key {}", redact(key));
    Ok(record)
}

/// One row of `list-keys` output.
#[derive(Debug)]
pub struct KeyListing<'a>(pub &'a ApiKeyRecord);

impl fmt::Display for KeyListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0;
        let created = DateTime::<Utc>::from_timestamp_millis(record.created_at)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.created_at.to_string());
        write!(
            f,
            "Key: {}, Created: {}, Active: {}, Rate limit: {}/min, Tokens: {}",
            record.key,
            created,
            if record.active { "yes" } else { "no" },
            record.rate_limit,
            record.tokens
        )?;
        if let Some(description) = &record.description {
            write!(f, ", Description: {description}")?;
        }
        Ok(())
    }
}
