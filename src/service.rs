//! Conversion service: request validation happens before this layer, rate
//! lookup with retry, conversion, rate tables and diagnostics happen here.

use crate::core::cache::RateCache;
use crate::core::clock::Clock;
use crate::core::config::{AppConfig, MAX_TTL_SECS, RetryConfig};
use crate::core::convert::{Conversion, ConversionRequest, convert};
use crate::core::error::Result;
use crate::core::rate::{Currency, RatePair, RateQuote, RateSource};
use crate::providers::caching::CachingRateProvider;
use crate::providers::chain::StrategyChain;
use crate::providers::endpoint_probe::{EndpointProbeStrategy, EndpointReachability};
use crate::providers::extract::RateTable;
use crate::providers::fallback::FallbackTable;
use crate::providers::page_scrape::PageScrapeStrategy;
use crate::providers::util::{Backoff, with_retry};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A quote together with whether it was served from the cache.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    pub value: T,
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatesReport {
    pub rates: BTreeMap<Currency, RateQuote>,
    pub errors: BTreeMap<Currency, String>,
    pub cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHealth {
    pub url: Option<String>,
    pub reachable: bool,
    pub status: Option<u16>,
    pub content_length: usize,
    pub rates_found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub error: Option<String>,
}

impl UpstreamHealth {
    fn failed(url: Option<String>, error: String) -> Self {
        Self {
            url,
            reachable: false,
            status: None,
            content_length: 0,
            rates_found: 0,
            title: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub upstream: UpstreamHealth,
    pub endpoints: EndpointReachability,
    pub cache_entries: usize,
    pub fallback_available: bool,
    pub strategies: Vec<&'static str>,
    pub timestamp: DateTime<Utc>,
}

/// Every configured page probed, plus endpoint reachability.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub pages: Vec<UpstreamHealth>,
    pub endpoints: EndpointReachability,
    pub scraping_worked: bool,
    /// Rates read from the first page that yielded any.
    pub rates: BTreeMap<Currency, RatePair>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSummary {
    pub conversion_worked: bool,
    pub scraping_worked: bool,
    pub rates_obtained: usize,
    pub using_fallback: bool,
}

/// A conversion attempt alongside everything needed to see why it went the
/// way it did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub conversion: Option<Conversion>,
    pub error: Option<String>,
    pub diagnostics: DiagnosticsReport,
    pub rates: RatesReport,
    pub summary: DebugSummary,
}

pub struct ConversionService {
    provider: CachingRateProvider<StrategyChain>,
    health_probe: PageScrapeStrategy,
    endpoint_probe: EndpointProbeStrategy,
    retry: RetryConfig,
}

impl ConversionService {
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let chain = StrategyChain::from_config(config, clock.clone())?;
        Ok(Self::with_chain(config, chain, clock))
    }

    /// Builds the service around an already assembled strategy chain.
    pub fn with_chain(config: &AppConfig, chain: StrategyChain, clock: Arc<dyn Clock>) -> Self {
        // Bounded, so the cast cannot wrap.
        let ttl_secs = config.cache.ttl_secs.min(MAX_TTL_SECS) as i64;
        let cache = RateCache::new(chrono::Duration::seconds(ttl_secs), clock);
        Self {
            provider: CachingRateProvider::new(chain, cache, config.cache.cache_fallback),
            health_probe: PageScrapeStrategy::new(&config.scrape),
            endpoint_probe: EndpointProbeStrategy::new(&config.scrape),
            retry: config.retry.clone(),
        }
    }

    pub fn cache(&self) -> &RateCache {
        self.provider.cache()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.provider.inner().strategy_names()
    }

    pub fn fallback(&self) -> Option<&FallbackTable> {
        self.provider.inner().fallback()
    }

    /// Looks up a quote, retrying upstream failures with exponential backoff.
    pub async fn quote(&self, currency: Currency) -> Result<Lookup<RateQuote>> {
        let provider = &self.provider;
        let (quote, cached) = with_retry(
            move || provider.get_rate_with_origin(currency),
            self.retry.attempts,
            Backoff::Exponential(self.retry.base_delay_ms),
        )
        .await?;
        Ok(Lookup {
            value: quote,
            cached,
        })
    }

    #[instrument(skip(self), fields(operation = %request.operation, currency = %request.currency, amount = %request.amount))]
    pub async fn convert(&self, request: &ConversionRequest) -> Result<Lookup<Conversion>> {
        let quote = self.quote(request.currency).await?;
        let conversion = convert(request, &quote.value);
        info!(
            mxn = %conversion.mxn,
            rate = %conversion.rate,
            source = %conversion.source,
            "Converted amount"
        );
        Ok(Lookup {
            value: conversion,
            cached: quote.cached,
        })
    }

    /// Quotes for every supported currency. A currency that cannot be
    /// quoted is reported under `errors` instead of failing the table.
    pub async fn rates(&self) -> RatesReport {
        let lookups = join_all(Currency::ALL.map(|currency| async move {
            (currency, self.quote(currency).await)
        }))
        .await;

        let mut report = RatesReport {
            rates: BTreeMap::new(),
            errors: BTreeMap::new(),
            cached: true,
        };
        for (currency, lookup) in lookups {
            match lookup {
                Ok(lookup) => {
                    report.cached &= lookup.cached;
                    report.rates.insert(currency, lookup.value);
                }
                Err(e) => {
                    warn!(%currency, error = %e, "No rate for currency");
                    report.cached = false;
                    report.errors.insert(currency, e.to_string());
                }
            }
        }
        report
    }

    /// Loads one page, folding failures into the report.
    async fn page_health(&self, url: &str) -> (UpstreamHealth, RateTable) {
        match self.health_probe.probe(url).await {
            Ok(page) => {
                let health = UpstreamHealth {
                    url: Some(page.url),
                    reachable: (200..300).contains(&page.status),
                    status: Some(page.status),
                    content_length: page.content_length,
                    rates_found: page.rates.len(),
                    title: page.title,
                    error: None,
                };
                (health, page.rates)
            }
            Err(e) => {
                warn!(%url, error = %e, "Health probe failed");
                (
                    UpstreamHealth::failed(Some(url.to_string()), e.to_string()),
                    RateTable::new(),
                )
            }
        }
    }

    /// Probes the primary rate page and the alternate endpoints. Never
    /// fails; problems show up in the report.
    pub async fn health(&self) -> HealthReport {
        let primary = async {
            match self.health_probe.primary_url() {
                Some(url) => self.page_health(url).await.0,
                None => UpstreamHealth::failed(None, "no page URLs configured".to_string()),
            }
        };
        let (upstream, endpoints) = tokio::join!(primary, self.endpoint_probe.reachability());

        HealthReport {
            status: if upstream.reachable {
                HealthStatus::Ok
            } else {
                HealthStatus::Degraded
            },
            upstream,
            endpoints,
            cache_entries: self.cache().len().await,
            fallback_available: self.fallback().is_some(),
            strategies: self.strategy_names(),
            timestamp: self.cache().clock().now(),
        }
    }

    /// Probes every configured page and endpoint.
    #[instrument(skip(self))]
    pub async fn diagnostics(&self) -> DiagnosticsReport {
        let pages = join_all(self.health_probe.urls().iter().map(|url| self.page_health(url)));
        let (pages, endpoints) = tokio::join!(pages, self.endpoint_probe.reachability());

        let rates: BTreeMap<Currency, RatePair> = pages
            .iter()
            .find(|(_, rates)| !rates.is_empty())
            .map(|(_, rates)| rates.iter().map(|(c, p)| (*c, *p)).collect())
            .unwrap_or_default();
        let pages: Vec<UpstreamHealth> = pages.into_iter().map(|(health, _)| health).collect();
        let scraping_worked = pages
            .iter()
            .any(|page| page.reachable && page.rates_found > 0);
        info!(
            pages = pages.len(),
            scraping_worked,
            endpoints_up = endpoints.successful,
            "Diagnostics complete"
        );

        DiagnosticsReport {
            pages,
            endpoints,
            scraping_worked,
            rates,
            timestamp: self.cache().clock().now(),
        }
    }

    /// Converts without failing: the conversion error, if any, is reported
    /// next to diagnostics and the rate table.
    pub async fn debug(&self, request: &ConversionRequest) -> DebugReport {
        let (conversion, diagnostics) = tokio::join!(self.convert(request), self.diagnostics());
        let rates = self.rates().await;

        let (conversion, error) = match conversion {
            Ok(lookup) => (Some(lookup.value), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let summary = DebugSummary {
            conversion_worked: conversion.is_some(),
            scraping_worked: diagnostics.scraping_worked,
            rates_obtained: rates.rates.len(),
            using_fallback: conversion
                .as_ref()
                .is_some_and(|c| c.source == RateSource::Fallback),
        };
        DebugReport {
            conversion,
            error,
            diagnostics,
            rates,
            summary,
        }
    }

    pub async fn clear_cache(&self) -> usize {
        let removed = self.cache().clear().await;
        info!(removed, "Cleared rate cache");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::config::ScrapeConfig;
    use crate::core::error::RateError;
    use crate::core::rate::{Operation, RatePair, RateSource};
    use crate::providers::chain::RateStrategy;
    use crate::providers::chain::tests::StubStrategy;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_pair() -> Result<RatePair> {
        Ok(RatePair::new(dec!(17.80), dec!(19.30)))
    }

    fn down() -> Result<RatePair> {
        Err(RateError::upstream("stub", "down"))
    }

    fn test_config(page_urls: Vec<String>) -> AppConfig {
        let mut config = AppConfig::default();
        config.retry = RetryConfig {
            attempts: 2,
            base_delay_ms: 1,
        };
        config.scrape = ScrapeConfig {
            page_urls,
            endpoint_urls: vec![],
            request_timeout_secs: 5,
            retries: 0,
            retry_delay_ms: 1,
            min_content_length: 10,
        };
        config
    }

    fn service_with(
        config: &AppConfig,
        stub: Arc<StubStrategy>,
        fallback: bool,
    ) -> (ConversionService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let table = fallback
            .then(|| FallbackTable::from_config(&config.fallback))
            .flatten();
        let chain = StrategyChain::new(
            vec![stub as Arc<dyn RateStrategy>],
            Duration::from_secs(1),
            table,
            clock.clone(),
        );
        (
            ConversionService::with_chain(config, chain, clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_convert_uses_cache_within_ttl() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, clock) = service_with(&config, stub.clone(), true);
        let request = ConversionRequest::new(Operation::Buy, Currency::Usd, dec!(300)).unwrap();

        let first = service.convert(&request).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.value.mxn, dec!(5340.00));

        clock.advance(chrono::Duration::seconds(60));
        let second = service.convert(&request).await.unwrap();
        assert!(second.cached);
        assert_eq!(first.value.timestamp, second.value.timestamp);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upstream_failures_are_retried() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", down));
        let (service, _clock) = service_with(&config, stub.clone(), false);

        let err = service.quote(Currency::Usd).await.unwrap_err();
        assert!(matches!(err, RateError::UpstreamUnavailable { .. }));
        // one initial attempt plus two retries
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rates_reports_fallback_for_every_currency() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", down));
        let (service, _clock) = service_with(&config, stub, true);

        let report = service.rates().await;
        assert_eq!(report.rates.len(), Currency::ALL.len());
        assert!(report.errors.is_empty());
        assert!(
            report
                .rates
                .values()
                .all(|q| q.source == RateSource::Fallback)
        );
    }

    #[tokio::test]
    async fn test_rates_collects_per_currency_errors() {
        let config = test_config(vec![]);
        // USD-shaped rates are implausible for every other currency.
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, false);

        let report = service.rates().await;
        assert_eq!(report.rates.len(), 1);
        assert!(report.rates.contains_key(&Currency::Usd));
        assert_eq!(report.errors.len(), Currency::ALL.len() - 1);
        assert!(!report.cached);
    }

    #[tokio::test]
    async fn test_clear_cache_reports_removed_entries() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, true);

        service.quote(Currency::Usd).await.unwrap();
        service.quote(Currency::Eur).await.unwrap();
        assert_eq!(service.clear_cache().await, 2);
        assert_eq!(service.clear_cache().await, 0);
    }

    #[tokio::test]
    async fn test_health_probes_primary_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/divisas.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><title>Divisas</title><body>Dólar compra 17.80 venta 19.30</body></html>",
            ))
            .mount(&mock_server)
            .await;

        let config = test_config(vec![format!("{}/divisas.php", mock_server.uri())]);
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, true);

        let report = service.health().await;
        assert_eq!(report.status, HealthStatus::Ok);
        assert_eq!(report.upstream.status, Some(200));
        assert!(report.upstream.content_length > 0);
        assert!(report.fallback_available);
        assert_eq!(report.strategies, vec!["stub"]);
    }

    #[tokio::test]
    async fn test_health_degraded_when_page_blocked() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let config = test_config(vec![format!("{}/divisas.php", mock_server.uri())]);
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, false);

        let report = service.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.upstream.status, Some(403));
        assert!(!report.fallback_available);
    }

    #[tokio::test]
    async fn test_health_counts_reachable_endpoints() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/divisas"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let mut config = test_config(vec![format!("{}/divisas.php", mock_server.uri())]);
        config.scrape.endpoint_urls = vec![
            format!("{}/api/divisas", mock_server.uri()),
            format!("{}/api/rates", mock_server.uri()),
        ];
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, true);

        let report = service.health().await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(
            report.endpoints,
            EndpointReachability {
                successful: 1,
                attempted: 2
            }
        );
    }

    #[tokio::test]
    async fn test_diagnostics_probes_every_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked.php"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/divisas.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><title>Divisas</title><body><p>USD 17.80 19.30</p></body></html>",
            ))
            .mount(&mock_server)
            .await;

        let config = test_config(vec![
            format!("{}/blocked.php", mock_server.uri()),
            format!("{}/divisas.php", mock_server.uri()),
        ]);
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, true);

        let report = service.diagnostics().await;
        assert_eq!(report.pages.len(), 2);
        assert_eq!(report.pages[0].status, Some(403));
        assert!(!report.pages[0].reachable);
        assert_eq!(report.pages[1].title.as_deref(), Some("Divisas"));
        assert_eq!(report.pages[1].rates_found, 1);
        assert!(report.scraping_worked);
        assert_eq!(
            report.rates.get(&Currency::Usd),
            Some(&RatePair::new(dec!(17.80), dec!(19.30)))
        );
        assert_eq!(report.endpoints.attempted, 0);
    }

    #[tokio::test]
    async fn test_debug_reports_fallback_conversion() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", down));
        let (service, _clock) = service_with(&config, stub, true);
        let request = ConversionRequest::new(Operation::Sell, Currency::Eur, dec!(10)).unwrap();

        let report = service.debug(&request).await;
        assert!(report.error.is_none());
        assert_eq!(report.conversion.unwrap().mxn, dec!(218.00));
        assert!(report.summary.conversion_worked);
        assert!(report.summary.using_fallback);
        assert!(!report.summary.scraping_worked);
        assert_eq!(report.summary.rates_obtained, Currency::ALL.len());
    }

    #[tokio::test]
    async fn test_debug_keeps_conversion_error() {
        let config = test_config(vec![]);
        let stub = Arc::new(StubStrategy::new("stub", down));
        let (service, _clock) = service_with(&config, stub, false);
        let request = ConversionRequest::new(Operation::Buy, Currency::Usd, dec!(10)).unwrap();

        let report = service.debug(&request).await;
        assert!(report.conversion.is_none());
        assert!(report.error.is_some());
        assert!(!report.summary.conversion_worked);
        assert!(!report.summary.using_fallback);
        assert_eq!(report.summary.rates_obtained, 0);
    }

    #[test]
    fn test_oversized_ttl_does_not_wrap() {
        let mut config = test_config(vec![]);
        config.cache.ttl_secs = u64::MAX;
        let stub = Arc::new(StubStrategy::new("stub", ok_pair));
        let (service, _clock) = service_with(&config, stub, true);
        assert_eq!(
            service.cache().ttl(),
            chrono::Duration::seconds(MAX_TTL_SECS as i64)
        );
    }
}
