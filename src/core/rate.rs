//! Rate types and the provider abstraction

use crate::core::error::{RateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Buy,
    Sell,
}

impl Operation {
    /// Terms accepted on input, including the bank's own vocabulary.
    pub const ACCEPTED_TERMS: [&'static str; 6] =
        ["buy", "sell", "compra", "venta", "comprar", "vender"];
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Buy => write!(f, "buy"),
            Operation::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for Operation {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "compra" | "comprar" => Ok(Operation::Buy),
            "sell" | "venta" | "vender" => Ok(Operation::Sell),
            _ => Err(RateError::Validation(format!(
                "Invalid operation '{s}': expected one of {}",
                Operation::ACCEPTED_TERMS.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Cad,
    Gbp,
    Jpy,
}

impl Currency {
    pub const ALL: [Currency; 5] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Cad,
        Currency::Gbp,
        Currency::Jpy,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Cad => "CAD",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
        }
    }

    /// Range an MXN rate must fall in to be taken seriously.
    pub fn plausible_range(&self) -> (Decimal, Decimal) {
        match self {
            Currency::Usd => (Decimal::new(15, 0), Decimal::new(25, 0)),
            Currency::Eur => (Decimal::new(18, 0), Decimal::new(28, 0)),
            Currency::Cad => (Decimal::new(12, 0), Decimal::new(17, 0)),
            Currency::Gbp => (Decimal::new(20, 0), Decimal::new(30, 0)),
            Currency::Jpy => (Decimal::new(1, 1), Decimal::new(2, 1)),
        }
    }

    pub fn is_plausible(&self, rate: Decimal) -> bool {
        let (min, max) = self.plausible_range();
        rate >= min && rate <= max
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = RateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "CAD" => Ok(Currency::Cad),
            "GBP" => Ok(Currency::Gbp),
            "JPY" => Ok(Currency::Jpy),
            _ => Err(RateError::Validation(format!(
                "Unsupported currency '{s}': expected one of {}",
                Currency::ALL.map(|c| c.code()).join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    Scraped,
    Fallback,
}

impl Display for RateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateSource::Scraped => write!(f, "scraped"),
            RateSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Buy/sell pair as produced by a strategy, before it is stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RatePair {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl RatePair {
    pub fn new(buy: Decimal, sell: Decimal) -> Self {
        Self { buy, sell }
    }

    /// Builds a pair from two observed values without knowing which is which.
    pub fn from_unordered(a: Decimal, b: Decimal) -> Self {
        Self {
            buy: a.min(b),
            sell: a.max(b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateQuote {
    pub currency: Currency,
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
    pub fetched_at: DateTime<Utc>,
    pub source: RateSource,
    pub strategy: String,
}

impl RateQuote {
    pub fn new(
        currency: Currency,
        pair: RatePair,
        fetched_at: DateTime<Utc>,
        source: RateSource,
        strategy: &str,
    ) -> Self {
        Self {
            currency,
            buy_rate: pair.buy,
            sell_rate: pair.sell,
            fetched_at,
            source,
            strategy: strategy.to_string(),
        }
    }

    pub fn has_valid_spread(&self) -> bool {
        self.sell_rate >= self.buy_rate
    }

    pub fn rate_for(&self, operation: Operation) -> Decimal {
        match operation {
            Operation::Buy => self.buy_rate,
            Operation::Sell => self.sell_rate,
        }
    }
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn get_rate(&self, currency: Currency) -> Result<RateQuote>;
}
