use crate::core::config::ScrapeConfig;
use crate::core::error::{RateError, Result};
use crate::core::rate::{Currency, RatePair};
use crate::providers::chain::RateStrategy;
use crate::providers::extract::{RateTable, extract_rates, page_title};
use crate::providers::http::{ClientFactory, HTML_ACCEPT};
use crate::providers::util::{Backoff, with_retry};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Outcome of loading one page, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageProbe {
    pub url: String,
    pub status: u16,
    pub content_length: usize,
    pub title: Option<String>,
    #[serde(skip)]
    pub rates: RateTable,
}

/// Downloads the bank's rate page(s) and pattern-matches the rates out.
pub struct PageScrapeStrategy {
    urls: Vec<String>,
    clients: ClientFactory,
    retries: usize,
    retry_delay_ms: u64,
    min_content_length: usize,
}

impl PageScrapeStrategy {
    pub const NAME: &'static str = "page_scrape";

    pub fn new(config: &ScrapeConfig) -> Self {
        Self {
            urls: config.page_urls.clone(),
            clients: ClientFactory::new(Duration::from_secs(config.request_timeout_secs)),
            retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
            min_content_length: config.min_content_length,
        }
    }

    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub async fn probe(&self, url: &str) -> Result<PageProbe> {
        let client = self.clients.client(HTML_ACCEPT)?;
        let response = with_retry(
            || async { client.get(url).send().await },
            self.retries,
            Backoff::Fixed(self.retry_delay_ms),
        )
        .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%url, status = status.as_u16(), size = body.len(), "Fetched rate page");

        let rates = if status.is_success() && body.len() >= self.min_content_length {
            extract_rates(&body)
        } else {
            RateTable::new()
        };

        Ok(PageProbe {
            url: url.to_string(),
            status: status.as_u16(),
            content_length: body.len(),
            title: page_title(&body),
            rates,
        })
    }
}

#[async_trait]
impl RateStrategy for PageScrapeStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(name = "PageScrape", skip(self), fields(currency = %currency))]
    async fn fetch(&self, currency: Currency) -> Result<RatePair> {
        let mut failures = Vec::new();

        for url in &self.urls {
            let page = match self.probe(url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(%url, error = %e, "Failed to load rate page");
                    failures.push(format!("{url}: {e}"));
                    continue;
                }
            };

            if !(200..300).contains(&page.status) {
                failures.push(format!("{url}: HTTP {}", page.status));
                continue;
            }
            if page.content_length < self.min_content_length {
                debug!(%url, size = page.content_length, "Page too small, skipping");
                failures.push(format!("{url}: content too small"));
                continue;
            }

            if let Some(pair) = page.rates.get(&currency) {
                info!(%url, buy = %pair.buy, sell = %pair.sell, "Extracted rates from page");
                return Ok(*pair);
            }
            failures.push(format!("{url}: no {currency} rate found"));
        }

        Err(RateError::upstream(
            Self::NAME,
            if failures.is_empty() {
                "no page URLs configured".to_string()
            } else {
                failures.join("; ")
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn padded(body: &str) -> String {
        format!("<html><title>Divisas</title><body>{body}{}</body></html>", " ".repeat(1200))
    }

    fn strategy_for(urls: Vec<String>) -> PageScrapeStrategy {
        PageScrapeStrategy::new(&ScrapeConfig {
            page_urls: urls,
            endpoint_urls: vec![],
            request_timeout_secs: 5,
            retries: 0,
            retry_delay_ms: 10,
            min_content_length: 1000,
        })
    }

    #[tokio::test]
    async fn test_scrapes_rates_from_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/divisas.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(padded(
                "<table><tr><td>USD</td><td>17.80</td><td>19.30</td></tr></table>",
            )))
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![format!("{}/divisas.php", mock_server.uri())]);
        let pair = strategy.fetch(Currency::Usd).await.unwrap();
        assert_eq!(pair, RatePair::new(dec!(17.80), dec!(19.30)));
    }

    #[tokio::test]
    async fn test_skips_small_pages_and_tries_next_url() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blocked"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>USD 17.80 19.30</html>"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/divisas"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(padded("<p>EUR compra 20.10 venta 21.70</p>")),
            )
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![
            format!("{}/blocked", mock_server.uri()),
            format!("{}/divisas", mock_server.uri()),
        ]);
        let pair = strategy.fetch(Currency::Eur).await.unwrap();
        assert_eq!(pair, RatePair::new(dec!(20.10), dec!(21.70)));
    }

    #[tokio::test]
    async fn test_reports_all_failures() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/divisas.php"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![format!("{}/divisas.php", mock_server.uri())]);
        let err = strategy.fetch(Currency::Usd).await.unwrap_err();
        assert!(matches!(err, RateError::UpstreamUnavailable { .. }));
        assert!(err.to_string().contains("HTTP 403"));
    }

    #[tokio::test]
    async fn test_probe_reports_status_and_size() {
        let mock_server = MockServer::start().await;
        let body = padded("<p>nothing here</p>");
        Mock::given(method("GET"))
            .and(path("/divisas.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&mock_server)
            .await;

        let url = format!("{}/divisas.php", mock_server.uri());
        let probe = strategy_for(vec![url.clone()]).probe(&url).await.unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.content_length, body.len());
        assert_eq!(probe.title.as_deref(), Some("Divisas"));
        assert!(probe.rates.is_empty());
    }
}
