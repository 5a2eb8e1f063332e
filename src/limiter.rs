//! Per-key token windows
//!
//! Each key gets `rate_limit` tokens per window. The window is measured from the key's last
//! successful consumption: once [`WINDOW_MILLIS`] have passed since then, the next request
//! refills the budget to the key's *currently configured* limit before consuming.
//!
//! The in-memory entry is the authority while the process runs. It is seeded from the store the
//! first time a key is seen and written back after every consumption, so a restart picks up
//! where the last admitted request left off.
use crate::auth::redact;
use crate::traits::{ApiKeyRecord, KeyStore};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Length of a rate-limit window.
pub const WINDOW_MILLIS: i64 = 60_000;

/// Working copy of a key's token state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub tokens: i64,
    pub last_used: i64,
}

impl CacheEntry {
    fn seeded_from(record: &ApiKeyRecord) -> Self {
        Self {
            tokens: record.tokens,
            last_used: record.last_used,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A token was consumed; `remaining` are left in this window.
    Admitted { remaining: i64 },
    /// The window's budget is spent.
    Limited,
}

#[derive(Debug, Default, Clone)]
pub struct RateLimiter {
    /// One lock per key, so requests for different keys never wait on each other.
    entries: Arc<DashMap<String, Arc<Mutex<CacheEntry>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to consume one token for `record.key` at time `now`.
    ///
    /// Refill, check, decrement and write-back all happen under the key's lock. A failed
    /// write-back is logged and the admission stands.
    pub async fn check(&self, store: &dyn KeyStore, record: &ApiKeyRecord, now: i64) -> Decision {
        let slot = self.slot(record);
        let mut entry = slot.lock().await;

        // A clock that steps backwards leaves the window open until it catches up
        if now.saturating_sub(entry.last_used) >= WINDOW_MILLIS {
            trace!(
                "Refilling {} to {} tokens",
                redact(&record.key),
                record.rate_limit
            );
            entry.tokens = record.rate_limit;
        }

        if entry.tokens <= 0 {
            debug!("Rate limit exceeded for key {}", redact(&record.key));
            return Decision::Limited;
        }

        entry.tokens -= 1;
        entry.last_used = now;

        if let Err(e) = store
            .consume_token(&record.key, entry.tokens, entry.last_used)
            .await
        {
            warn!(
                "Failed to persist token count for key {}: {}",
                redact(&record.key),
                e
            );
        }

        Decision::Admitted {
            remaining: entry.tokens,
        }
    }

    /// The key's lock, created from the persisted record on first sight.
    fn slot(&self, record: &ApiKeyRecord) -> Arc<Mutex<CacheEntry>> {
        // Clone the Arc out so the map shard isn't held while we wait on the key's lock
        self.entries
            .entry(record.key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CacheEntry::seeded_from(record))))
            .value()
            .clone()
    }

    /// Current cached state for a key, if it has been seen.
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        let entry = *slot.lock().await;
        Some(entry)
    }

    /// Number of keys with a cache entry.
    pub fn cached_keys(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::SqliteKeyStore;
    use crate::test_utils::FailingKeyStore;

    async fn store_with(record: &ApiKeyRecord) -> SqliteKeyStore {
        let store = SqliteKeyStore::open_in_memory().unwrap();
        store.insert(record).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sequential_window() {
        let record = ApiKeyRecord::new("K", 2, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        assert_eq!(
            limiter.check(&store, &record, 0).await,
            Decision::Admitted { remaining: 1 }
        );
        assert_eq!(
            limiter.check(&store, &record, 1).await,
            Decision::Admitted { remaining: 0 }
        );
        assert_eq!(limiter.check(&store, &record, 2).await, Decision::Limited);
        assert_eq!(
            limiter.check(&store, &record, 60_001).await,
            Decision::Admitted { remaining: 1 }
        );
    }

    #[tokio::test]
    async fn test_refill_at_exact_boundary() {
        let record = ApiKeyRecord::new("edge", 1, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        assert!(matches!(
            limiter.check(&store, &record, 0).await,
            Decision::Admitted { .. }
        ));
        assert_eq!(
            limiter.check(&store, &record, WINDOW_MILLIS - 1).await,
            Decision::Limited
        );
        assert_eq!(
            limiter.check(&store, &record, WINDOW_MILLIS).await,
            Decision::Admitted { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_full_refill_long_after_window() {
        let record = ApiKeyRecord::new("idle", 5, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        for t in 0..3 {
            limiter.check(&store, &record, t).await;
        }
        assert_eq!(limiter.entry("idle").await.unwrap().tokens, 2);

        // Ten windows later the budget is full, not "full plus leftovers"
        let later = 10 * WINDOW_MILLIS;
        assert_eq!(
            limiter.check(&store, &record, later).await,
            Decision::Admitted { remaining: 4 }
        );
    }

    #[tokio::test]
    async fn test_rejection_does_not_mutate_or_persist() {
        let record = ApiKeyRecord::new("empty", 1, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        limiter.check(&store, &record, 10).await;
        let before = store.lookup("empty").await.unwrap().unwrap();

        assert_eq!(limiter.check(&store, &record, 20).await, Decision::Limited);

        let after = store.lookup("empty").await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(
            limiter.entry("empty").await,
            Some(CacheEntry {
                tokens: 0,
                last_used: 10
            })
        );
    }

    #[tokio::test]
    async fn test_each_admission_is_persisted() {
        let record = ApiKeyRecord::new("persist", 3, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        limiter.check(&store, &record, 500).await;

        let persisted = store.lookup("persist").await.unwrap().unwrap();
        assert_eq!(persisted.tokens, 2);
        assert_eq!(persisted.last_used, 500);
    }

    #[tokio::test]
    async fn test_seeded_from_persisted_state() {
        // A previous process left one token in a window that started at t=1000
        let record = ApiKeyRecord::builder()
            .key("restart")
            .rate_limit(5)
            .tokens(1)
            .last_used(1_000)
            .build();
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        assert_eq!(
            limiter.check(&store, &record, 2_000).await,
            Decision::Admitted { remaining: 0 }
        );
        assert_eq!(
            limiter.check(&store, &record, 3_000).await,
            Decision::Limited
        );
    }

    #[tokio::test]
    async fn test_limit_change_applies_at_next_refill() {
        let mut record = ApiKeyRecord::new("resize", 2, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        limiter.check(&store, &record, 0).await;

        // The administrator raises the limit mid-window
        record.rate_limit = 5;
        assert_eq!(
            limiter.check(&store, &record, 1).await,
            Decision::Admitted { remaining: 0 }
        );
        assert_eq!(limiter.check(&store, &record, 2).await, Decision::Limited);

        assert_eq!(
            limiter.check(&store, &record, 1 + WINDOW_MILLIS).await,
            Decision::Admitted { remaining: 4 }
        );
    }

    #[tokio::test]
    async fn test_lowered_limit_spends_leftovers_then_refills_lower() {
        let mut record = ApiKeyRecord::new("shrink", 5, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        assert_eq!(
            limiter.check(&store, &record, 0).await,
            Decision::Admitted { remaining: 4 }
        );

        // Lowered mid-window: the four tokens already granted are still spendable
        record.rate_limit = 2;
        for (t, remaining) in [(1, 3), (2, 2), (3, 1), (4, 0)] {
            assert_eq!(
                limiter.check(&store, &record, t).await,
                Decision::Admitted { remaining }
            );
        }
        assert_eq!(limiter.check(&store, &record, 5).await, Decision::Limited);

        let refill_at = 4 + WINDOW_MILLIS;
        assert_eq!(
            limiter.check(&store, &record, refill_at).await,
            Decision::Admitted { remaining: 1 }
        );
        let persisted = store.lookup("shrink").await.unwrap().unwrap();
        assert_eq!(persisted.tokens, 1);
        assert_eq!(persisted.last_used, refill_at);

        assert_eq!(
            limiter.check(&store, &record, refill_at + 1).await,
            Decision::Admitted { remaining: 0 }
        );
        assert_eq!(
            limiter.check(&store, &record, refill_at + 2).await,
            Decision::Limited
        );
        assert_eq!(store.lookup("shrink").await.unwrap().unwrap().tokens, 0);
    }

    #[tokio::test]
    async fn test_reinserted_key_keeps_cached_window() {
        let record = ApiKeyRecord::new("again", 1, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        limiter.check(&store, &record, 0).await;

        store.remove("again").await.unwrap();
        let fresh = ApiKeyRecord::new("again", 3, 10);
        store.insert(&fresh).await.unwrap();

        // Entries are never evicted, so the spent window carries over
        assert_eq!(limiter.check(&store, &fresh, 20).await, Decision::Limited);
        assert_eq!(
            limiter.check(&store, &fresh, WINDOW_MILLIS).await,
            Decision::Admitted { remaining: 2 }
        );
    }

    #[tokio::test]
    async fn test_clock_stepping_backwards_does_not_refill() {
        let record = ApiKeyRecord::new("skew", 1, 0);
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        limiter.check(&store, &record, 100_000).await;
        assert_eq!(limiter.check(&store, &record, 0).await, Decision::Limited);
        assert_eq!(
            limiter.check(&store, &record, 100_000 + WINDOW_MILLIS).await,
            Decision::Admitted { remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_extreme_last_used_does_not_overflow() {
        let record = ApiKeyRecord::builder()
            .key("corrupt")
            .rate_limit(2)
            .tokens(0)
            .last_used(i64::MIN)
            .build();
        let store = store_with(&record).await;
        let limiter = RateLimiter::new();

        assert_eq!(
            limiter.check(&store, &record, 1_000).await,
            Decision::Admitted { remaining: 1 }
        );

        let future = ApiKeyRecord::builder()
            .key("future")
            .rate_limit(2)
            .tokens(0)
            .last_used(i64::MAX)
            .build();
        store.insert(&future).await.unwrap();
        assert_eq!(
            limiter.check(&store, &future, i64::MIN).await,
            Decision::Limited
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_still_admits() {
        let record = ApiKeyRecord::new("flaky", 1, 0);
        let limiter = RateLimiter::new();

        assert_eq!(
            limiter.check(&FailingKeyStore, &record, 0).await,
            Decision::Admitted { remaining: 0 }
        );
        assert_eq!(
            limiter.check(&FailingKeyStore, &record, 1).await,
            Decision::Limited
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_exceed_limit() {
        let record = ApiKeyRecord::new("busy", 5, 0);
        let store = Arc::new(store_with(&record).await);
        let limiter = RateLimiter::new();

        let mut handles = Vec::new();
        for _ in 0..64 {
            let limiter = limiter.clone();
            let store = Arc::clone(&store);
            let record = record.clone();
            handles.push(tokio::spawn(async move {
                limiter.check(store.as_ref(), &record, 100).await
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if let Decision::Admitted { .. } = handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        let persisted = store.lookup("busy").await.unwrap().unwrap();
        assert_eq!(persisted.tokens, 0);
    }

    #[tokio::test]
    async fn test_keys_have_independent_budgets() {
        let a = ApiKeyRecord::new("a", 1, 0);
        let b = ApiKeyRecord::new("b", 1, 0);
        let store = store_with(&a).await;
        store.insert(&b).await.unwrap();
        let limiter = RateLimiter::new();

        assert!(matches!(
            limiter.check(&store, &a, 0).await,
            Decision::Admitted { .. }
        ));
        assert_eq!(limiter.check(&store, &a, 1).await, Decision::Limited);
        assert!(matches!(
            limiter.check(&store, &b, 2).await,
            Decision::Admitted { .. }
        ));
        assert_eq!(limiter.cached_keys(), 2);
    }
}
