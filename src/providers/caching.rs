use crate::core::cache::RateCache;
use crate::core::error::Result;
use crate::core::rate::{Currency, RateProvider, RateQuote, RateSource};
use async_trait::async_trait;
use tracing::debug;

/// Serves quotes from a [`RateCache`] and only asks the inner provider on a
/// miss or after expiry.
pub struct CachingRateProvider<T: RateProvider> {
    inner: T,
    cache: RateCache,
    cache_fallback: bool,
}

impl<T: RateProvider> CachingRateProvider<T> {
    pub fn new(inner: T, cache: RateCache, cache_fallback: bool) -> Self {
        Self {
            inner,
            cache,
            cache_fallback,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Looks up a quote, reporting whether it came from the cache.
    pub async fn get_rate_with_origin(&self, currency: Currency) -> Result<(RateQuote, bool)> {
        if let Some(cached) = self.cache.get(currency).await {
            debug!(%currency, "Cache hit for rate");
            return Ok((cached, true));
        }
        debug!(%currency, "Cache miss for rate");
        let quote = self.inner.get_rate(currency).await?;
        if quote.source == RateSource::Scraped || self.cache_fallback {
            self.cache.put(quote.clone()).await;
        }
        Ok((quote, false))
    }
}

#[async_trait]
impl<T: RateProvider + Send + Sync> RateProvider for CachingRateProvider<T> {
    async fn get_rate(&self, currency: Currency) -> Result<RateQuote> {
        self.get_rate_with_origin(currency)
            .await
            .map(|(quote, _)| quote)
    }
}
