//! Admission decisions for keyed requests
use crate::auth::redact;
use crate::clock::{Clock, SystemClock};
use crate::errors::GatewayError;
use crate::limiter::{Decision, RateLimiter};
use crate::traits::{ApiKeyRecord, KeyStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Decides whether a request carrying an API key may reach the backend.
///
/// Lookups always go to the store so that deactivations and limit changes are seen straight
/// away; token accounting is delegated to the [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    store: Arc<dyn KeyStore>,
    limiter: RateLimiter,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(store: Arc<dyn KeyStore>, limiter: RateLimiter) -> Self {
        Self::with_clock(store, limiter, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn KeyStore>,
        limiter: RateLimiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            limiter,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Look a key up without touching its token budget. Used by the health probe.
    pub async fn verify(&self, key: Option<&str>) -> Result<ApiKeyRecord, GatewayError> {
        let key = key.filter(|k| !k.is_empty()).ok_or(GatewayError::MissingKey)?;
        match self.store.lookup(key).await? {
            Some(record) => Ok(record),
            None => {
                info!("Invalid API key: {}", redact(key));
                Err(GatewayError::UnknownKey)
            }
        }
    }

    /// Full admission: the key must exist, be active, and have a token left in its window.
    /// On success exactly one token has been consumed.
    pub async fn admit(&self, key: Option<&str>) -> Result<ApiKeyRecord, GatewayError> {
        let record = self.verify(key).await?;

        if !record.active {
            info!("Deactivated API key: {}", redact(&record.key));
            return Err(GatewayError::DeactivatedKey);
        }

        let now = self.clock.now_millis();
        match self.limiter.check(self.store.as_ref(), &record, now).await {
            Decision::Admitted { remaining } => {
                debug!(
                    "Admitted key {} ({} tokens left)",
                    redact(&record.key),
                    remaining
                );
                Ok(record)
            }
            Decision::Limited => Err(GatewayError::RateLimited),
        }
    }
}
