//! Ordered strategy chain with a static fallback.
//!
//! Strategies are tried in the configured order, each under the same
//! timeout. The first result that passes validation wins; later strategies
//! are not consulted to corroborate it. When every strategy fails the
//! fallback table answers, tagged `source: fallback`.

use crate::core::clock::Clock;
use crate::core::config::{AppConfig, StrategyKind};
use crate::core::error::{RateError, Result};
use crate::core::rate::{Currency, RatePair, RateProvider, RateQuote, RateSource};
use crate::providers::browser::BrowserStrategy;
use crate::providers::endpoint_probe::EndpointProbeStrategy;
use crate::providers::fallback::FallbackTable;
use crate::providers::page_scrape::PageScrapeStrategy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait RateStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, currency: Currency) -> Result<RatePair>;
}

pub struct StrategyChain {
    strategies: Vec<Arc<dyn RateStrategy>>,
    strategy_timeout: Duration,
    fallback: Option<FallbackTable>,
    clock: Arc<dyn Clock>,
}

impl StrategyChain {
    pub fn new(
        strategies: Vec<Arc<dyn RateStrategy>>,
        strategy_timeout: Duration,
        fallback: Option<FallbackTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategies,
            strategy_timeout,
            fallback,
            clock,
        }
    }

    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut strategies: Vec<Arc<dyn RateStrategy>> = Vec::new();
        for kind in &config.strategies {
            match kind {
                StrategyKind::PageScrape => {
                    strategies.push(Arc::new(PageScrapeStrategy::new(&config.scrape)))
                }
                StrategyKind::EndpointProbe => {
                    strategies.push(Arc::new(EndpointProbeStrategy::new(&config.scrape)))
                }
                StrategyKind::Browser => match BrowserStrategy::from_config(&config.browser)? {
                    Some(browser) => strategies.push(Arc::new(browser)),
                    None => info!("No WebDriver URL configured, browser strategy disabled"),
                },
            }
        }

        let fallback = FallbackTable::from_config(&config.fallback);
        if strategies.is_empty() && fallback.is_none() {
            return Err(RateError::Config(
                "no usable rate strategy and fallback disabled".to_string(),
            ));
        }

        Ok(Self::new(
            strategies,
            Duration::from_secs(config.strategy_timeout_secs),
            fallback,
            clock,
        ))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn fallback(&self) -> Option<&FallbackTable> {
        self.fallback.as_ref()
    }

    async fn run(&self, strategy: &dyn RateStrategy, currency: Currency) -> Result<RatePair> {
        let pair = tokio::time::timeout(self.strategy_timeout, strategy.fetch(currency))
            .await
            .map_err(|_| RateError::Timeout {
                strategy: strategy.name().to_string(),
            })??;
        validate(strategy.name(), currency, pair)?;
        Ok(pair)
    }
}

/// Rejects values that cannot be a real quote for the currency.
pub fn validate(strategy: &str, currency: Currency, pair: RatePair) -> Result<()> {
    if !currency.is_plausible(pair.buy) || !currency.is_plausible(pair.sell) {
        return Err(RateError::upstream(
            strategy,
            format!(
                "implausible {currency} rates buy {} sell {}",
                pair.buy, pair.sell
            ),
        ));
    }
    if pair.sell < pair.buy {
        return Err(RateError::upstream(
            strategy,
            format!(
                "{currency} sell rate {} below buy rate {}",
                pair.sell, pair.buy
            ),
        ));
    }
    Ok(())
}

#[async_trait]
impl RateProvider for StrategyChain {
    async fn get_rate(&self, currency: Currency) -> Result<RateQuote> {
        let mut failures = Vec::new();
        let mut retryable = false;

        for strategy in &self.strategies {
            debug!(strategy = strategy.name(), %currency, "Trying rate strategy");
            match self.run(strategy.as_ref(), currency).await {
                Ok(pair) => {
                    info!(strategy = strategy.name(), %currency, "Rate strategy succeeded");
                    return Ok(RateQuote::new(
                        currency,
                        pair,
                        self.clock.now(),
                        RateSource::Scraped,
                        strategy.name(),
                    ));
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), %currency, error = %e, "Rate strategy failed");
                    retryable |= e.is_retryable();
                    failures.push(e.to_string());
                }
            }
        }

        if let Some(quote) = self
            .fallback
            .as_ref()
            .and_then(|table| table.quote(currency, self.clock.now()))
        {
            warn!(%currency, "All strategies failed, using fallback rates");
            return Ok(quote);
        }

        let reason = if failures.is_empty() {
            "no strategies configured".to_string()
        } else {
            failures.join(" | ")
        };
        if retryable {
            Err(RateError::upstream("chain", reason))
        } else {
            Err(RateError::RateUnavailable {
                currency: currency.to_string(),
                reason,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::config::FallbackConfig;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct StubStrategy {
        pub name: &'static str,
        pub result: fn() -> Result<RatePair>,
        pub calls: AtomicUsize,
        pub delay: Duration,
    }

    impl StubStrategy {
        pub fn new(name: &'static str, result: fn() -> Result<RatePair>) -> Self {
            Self {
                name,
                result,
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl RateStrategy for StubStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _currency: Currency) -> Result<RatePair> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.result)()
        }
    }

    fn ok_pair() -> Result<RatePair> {
        Ok(RatePair::new(dec!(17.90), dec!(19.40)))
    }

    fn down() -> Result<RatePair> {
        Err(RateError::upstream("stub", "down"))
    }

    fn inverted() -> Result<RatePair> {
        Ok(RatePair::new(dec!(19.40), dec!(17.90)))
    }

    fn chain(stubs: Vec<Arc<StubStrategy>>, fallback: bool) -> StrategyChain {
        let strategies = stubs
            .into_iter()
            .map(|s| s as Arc<dyn RateStrategy>)
            .collect();
        let table = fallback
            .then(|| FallbackTable::from_config(&FallbackConfig::default()))
            .flatten();
        StrategyChain::new(
            strategies,
            Duration::from_millis(100),
            table,
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = Arc::new(StubStrategy::new("first", ok_pair));
        let second = Arc::new(StubStrategy::new("second", ok_pair));
        let chain = chain(vec![first.clone(), second.clone()], true);

        let quote = chain.get_rate(Currency::Usd).await.unwrap();
        assert_eq!(quote.strategy, "first");
        assert_eq!(quote.source, RateSource::Scraped);
        assert_eq!(quote.buy_rate, dec!(17.90));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_moves_to_next_strategy() {
        let first = Arc::new(StubStrategy::new("first", down));
        let second = Arc::new(StubStrategy::new("second", ok_pair));
        let chain = chain(vec![first.clone(), second.clone()], true);

        let quote = chain.get_rate(Currency::Usd).await.unwrap();
        assert_eq!(quote.strategy, "second");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spread_violation_is_rejected() {
        let first = Arc::new(StubStrategy::new("first", inverted));
        let chain = chain(vec![first], true);

        let quote = chain.get_rate(Currency::Usd).await.unwrap();
        assert_eq!(quote.source, RateSource::Fallback);
        assert!(quote.has_valid_spread());
    }

    #[tokio::test]
    async fn test_implausible_rates_are_rejected() {
        let first = Arc::new(StubStrategy::new("first", ok_pair));
        let chain = chain(vec![first], false);

        // 17.90 is a USD-shaped value, far outside the JPY range.
        let err = chain.get_rate(Currency::Jpy).await.unwrap_err();
        assert!(err.to_string().contains("implausible JPY rates"));
    }

    #[tokio::test]
    async fn test_slow_strategy_times_out() {
        let mut slow = StubStrategy::new("slow", ok_pair);
        slow.delay = Duration::from_secs(5);
        let chain = chain(vec![Arc::new(slow)], false);

        let err = chain.get_rate(Currency::Usd).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Timed out waiting for strategy: slow"));
    }

    #[tokio::test]
    async fn test_fallback_when_everything_fails() {
        let chain = chain(vec![Arc::new(StubStrategy::new("first", down))], true);
        let quote = chain.get_rate(Currency::Eur).await.unwrap();
        assert_eq!(quote.source, RateSource::Fallback);
        assert_eq!(quote.strategy, "fallback");
        assert_eq!(quote.buy_rate, dec!(20.20));
    }

    #[tokio::test]
    async fn test_without_fallback_failure_is_retryable_upstream_error() {
        let chain = chain(vec![Arc::new(StubStrategy::new("first", down))], false);
        let err = chain.get_rate(Currency::Usd).await.unwrap_err();
        assert!(matches!(err, RateError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_no_strategies_and_no_fallback_is_unavailable() {
        let chain = chain(vec![], false);
        let err = chain.get_rate(Currency::Usd).await.unwrap_err();
        assert!(matches!(err, RateError::RateUnavailable { .. }));
    }

    #[test]
    fn test_from_config_skips_browser_without_webdriver() {
        let config = AppConfig::default();
        let chain = StrategyChain::from_config(&config, Arc::new(SystemClock)).unwrap();
        assert_eq!(chain.strategy_names(), vec!["page_scrape", "endpoint_probe"]);
        assert!(chain.fallback().is_some());
    }
}
