use crate::core::config::ScrapeConfig;
use crate::core::error::{RateError, Result};
use crate::core::rate::{Currency, RatePair};
use crate::providers::chain::RateStrategy;
use crate::providers::extract::RateTable;
use crate::providers::http::{ClientFactory, JSON_ACCEPT};
use crate::providers::util::{Backoff, with_retry};
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Keys under which candidate endpoints have been seen to nest their rates.
const RATE_FIELDS: [&str; 5] = ["rates", "exchangeRates", "currency", "divisas", "data"];

/// How many candidate endpoints answered with a success status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointReachability {
    pub successful: usize,
    pub attempted: usize,
}

/// Probes candidate JSON endpoints that may back the bank's rate widget.
pub struct EndpointProbeStrategy {
    urls: Vec<String>,
    clients: ClientFactory,
    retries: usize,
    retry_delay_ms: u64,
}

impl EndpointProbeStrategy {
    pub const NAME: &'static str = "endpoint_probe";

    pub fn new(config: &ScrapeConfig) -> Self {
        Self {
            urls: config.endpoint_urls.clone(),
            clients: ClientFactory::new(Duration::from_secs(config.request_timeout_secs)),
            retries: config.retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }

    /// Sends one request to every candidate endpoint, without retries.
    pub async fn reachability(&self) -> EndpointReachability {
        let Ok(client) = self.clients.client(JSON_ACCEPT) else {
            return EndpointReachability {
                successful: 0,
                attempted: self.urls.len(),
            };
        };
        let answers = join_all(self.urls.iter().map(|url| {
            let client = &client;
            async move {
                match client.get(url).send().await {
                    Ok(response) => response.status().is_success(),
                    Err(e) => {
                        debug!(%url, error = %e, "Endpoint unreachable");
                        false
                    }
                }
            }
        }))
        .await;
        EndpointReachability {
            successful: answers.into_iter().filter(|ok| *ok).count(),
            attempted: self.urls.len(),
        }
    }

    async fn fetch_json(&self, url: &str) -> Result<Value> {
        let client = self.clients.client(JSON_ACCEPT)?;
        let response = with_retry(
            || async { client.get(url).send().await },
            self.retries,
            Backoff::Fixed(self.retry_delay_ms),
        )
        .await?;

        if !response.status().is_success() {
            return Err(RateError::upstream(
                Self::NAME,
                format!("HTTP {} from {url}", response.status().as_u16()),
            ));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            RateError::upstream(Self::NAME, format!("Invalid JSON from {url}: {e}"))
        })
    }
}

fn decimal_from(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            Decimal::from_str(&cleaned).ok()
        }
        _ => None,
    }
}

fn pair_from(value: &Value) -> Option<RatePair> {
    match value {
        Value::Object(fields) => {
            let buy = fields.get("compra").or_else(|| fields.get("buy"));
            let sell = fields.get("venta").or_else(|| fields.get("sell"));
            let buy = buy.and_then(decimal_from)?;
            let sell = sell.and_then(decimal_from)?;
            Some(RatePair::new(buy, sell))
        }
        Value::Number(_) => {
            let mid = decimal_from(value)?;
            (mid > Decimal::ZERO).then(|| {
                RatePair::new(
                    (mid * Decimal::new(99, 2)).round_dp(4),
                    (mid * Decimal::new(101, 2)).round_dp(4),
                )
            })
        }
        _ => None,
    }
}

/// Reads whatever rate shape the endpoint returned into a table. Values
/// outside the currency's plausible range are dropped.
pub fn parse_rate_payload(payload: &Value) -> RateTable {
    let mut rates = RateTable::new();
    for field in RATE_FIELDS {
        let Some(Value::Object(entries)) = payload.get(field) else {
            continue;
        };
        for (code, value) in entries {
            let Ok(currency) = code.parse::<Currency>() else {
                continue;
            };
            let Some(pair) = pair_from(value) else {
                continue;
            };
            if currency.is_plausible(pair.buy) && currency.is_plausible(pair.sell) {
                rates.entry(currency).or_insert(pair);
            } else {
                debug!(%currency, buy = %pair.buy, sell = %pair.sell, "Implausible endpoint rate");
            }
        }
    }
    rates
}

#[async_trait]
impl RateStrategy for EndpointProbeStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(name = "EndpointProbe", skip(self), fields(currency = %currency))]
    async fn fetch(&self, currency: Currency) -> Result<RatePair> {
        let mut failures = Vec::new();

        for url in &self.urls {
            debug!(%url, "Probing rate endpoint");
            match self.fetch_json(url).await {
                Ok(payload) => {
                    if let Some(pair) = parse_rate_payload(&payload).get(&currency) {
                        info!(%url, buy = %pair.buy, sell = %pair.sell, "Rates from endpoint");
                        return Ok(*pair);
                    }
                    failures.push(format!("{url}: no {currency} rate in payload"));
                }
                Err(e) => {
                    warn!(%url, error = %e, "Rate endpoint failed");
                    failures.push(format!("{url}: {e}"));
                }
            }
        }

        Err(RateError::upstream(
            Self::NAME,
            if failures.is_empty() {
                "no endpoint URLs configured".to_string()
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
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn strategy_for(urls: Vec<String>) -> EndpointProbeStrategy {
        EndpointProbeStrategy::new(&ScrapeConfig {
            page_urls: vec![],
            endpoint_urls: urls,
            request_timeout_secs: 5,
            retries: 0,
            retry_delay_ms: 10,
            min_content_length: 1000,
        })
    }

    #[test]
    fn test_parse_nested_pairs() {
        let payload = json!({
            "rates": {
                "USD": { "compra": 17.8, "venta": "19.30" },
                "XYZ": { "compra": 1, "venta": 2 }
            },
            "divisas": { "EUR": { "buy": 20.2, "sell": 21.8 } }
        });
        let rates = parse_rate_payload(&payload);
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[&Currency::Usd], RatePair::new(dec!(17.8), dec!(19.30)));
        assert_eq!(rates[&Currency::Eur], RatePair::new(dec!(20.2), dec!(21.8)));
    }

    #[test]
    fn test_parse_mid_rate_synthesizes_spread() {
        let payload = json!({ "data": { "USD": 18.5 } });
        let rates = parse_rate_payload(&payload);
        assert_eq!(rates[&Currency::Usd], RatePair::new(dec!(18.315), dec!(18.685)));
    }

    #[test]
    fn test_parse_mid_rate_checked_against_currency_range() {
        let payload = json!({ "data": { "USD": 1.0, "EUR": -20.5, "JPY": 0.12 } });
        let rates = parse_rate_payload(&payload);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&Currency::Jpy], RatePair::new(dec!(0.1188), dec!(0.1212)));
    }

    #[test]
    fn test_parse_ignores_unrelated_payloads() {
        assert!(parse_rate_payload(&json!({ "status": "ok" })).is_empty());
        assert!(parse_rate_payload(&json!([1, 2, 3])).is_empty());
    }

    #[tokio::test]
    async fn test_probes_until_an_endpoint_answers() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/divisas"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/rates"))
            .and(header("X-Requested-With", "XMLHttpRequest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "exchangeRates": { "GBP": { "compra": 22.5, "venta": 24.3 } }
            })))
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![
            format!("{}/api/divisas", mock_server.uri()),
            format!("{}/api/rates", mock_server.uri()),
        ]);
        let pair = strategy.fetch(Currency::Gbp).await.unwrap();
        assert_eq!(pair, RatePair::new(dec!(22.5), dec!(24.3)));
    }

    #[tokio::test]
    async fn test_reachability_counts_successful_endpoints() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/divisas"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/rates"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![
            format!("{}/api/divisas", mock_server.uri()),
            format!("{}/api/rates", mock_server.uri()),
            "http://127.0.0.1:1/unreachable".to_string(),
        ]);
        assert_eq!(
            strategy.reachability().await,
            EndpointReachability {
                successful: 1,
                attempted: 3
            }
        );
        assert_eq!(
            strategy_for(vec![]).reachability().await,
            EndpointReachability::default()
        );
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_upstream_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/divisas"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&mock_server)
            .await;

        let strategy = strategy_for(vec![format!("{}/api/divisas", mock_server.uri())]);
        let err = strategy.fetch(Currency::Usd).await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
