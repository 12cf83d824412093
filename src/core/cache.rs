use crate::core::clock::Clock;
use crate::core::rate::{Currency, RateQuote};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct CacheEntry {
    quote: RateQuote,
    expires_at: DateTime<Utc>,
}

/// Process-local quote cache keyed by currency.
///
/// Entries expire `ttl` after insertion as measured by the injected clock.
/// Expired entries are invisible to `get` and are physically removed by
/// `sweep`.
#[derive(Clone)]
pub struct RateCache {
    inner: Arc<Mutex<HashMap<Currency, CacheEntry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RateCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub async fn get(&self, currency: Currency) -> Option<RateQuote> {
        let cache = self.inner.lock().await;
        match cache.get(&currency) {
            Some(entry) if entry.expires_at > self.clock.now() => {
                debug!(%currency, "Cache HIT");
                Some(entry.quote.clone())
            }
            Some(_) => {
                debug!(%currency, "Cache entry expired");
                None
            }
            None => {
                debug!(%currency, "Cache MISS");
                None
            }
        }
    }

    pub async fn put(&self, quote: RateQuote) {
        let expires_at = self.clock.now() + self.ttl;
        let mut cache = self.inner.lock().await;
        debug!(currency = %quote.currency, %expires_at, "Cache PUT");
        cache.insert(quote.currency, CacheEntry { quote, expires_at });
    }

    /// Removes every entry, returning how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut cache = self.inner.lock().await;
        let removed = cache.len();
        cache.clear();
        debug!(removed, "Cache CLEAR");
        removed
    }

    /// Evicts expired entries, returning how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut cache = self.inner.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.expires_at > now);
        before - cache.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
