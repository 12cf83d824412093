//! MXN conversion for a validated request and a quote

use crate::core::error::{RateError, Result};
use crate::core::rate::{Currency, Operation, RateQuote, RateSource};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::str::FromStr;

/// Largest amount accepted for a single conversion.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(100_000, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRequest {
    pub operation: Operation,
    pub currency: Currency,
    pub amount: Decimal,
}

impl ConversionRequest {
    pub fn new(operation: Operation, currency: Currency, amount: Decimal) -> Result<Self> {
        validate_amount(amount)?;
        Ok(Self {
            operation,
            currency,
            amount,
        })
    }

    /// Parses raw operation, currency and amount strings.
    pub fn parse(operation: &str, currency: &str, amount: &str) -> Result<Self> {
        let operation = operation.parse::<Operation>()?;
        let currency = currency.parse::<Currency>()?;
        let amount = parse_amount(amount)?;
        Self::new(operation, currency, amount)
    }
}

pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| RateError::Validation(format!("Invalid amount '{raw}': not a number")))
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO || amount > MAX_AMOUNT {
        return Err(RateError::Validation(format!(
            "Amount must be greater than 0 and at most {MAX_AMOUNT}, got {amount}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub mxn: Decimal,
    pub rate: Decimal,
    pub operation: Operation,
    pub currency: Currency,
    pub amount: Decimal,
    pub source: RateSource,
    pub timestamp: DateTime<Utc>,
    pub buy_rate: Decimal,
    pub sell_rate: Decimal,
    pub strategy: String,
}

pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn convert(request: &ConversionRequest, quote: &RateQuote) -> Conversion {
    let rate = quote.rate_for(request.operation);
    Conversion {
        mxn: round2(request.amount * rate),
        rate,
        operation: request.operation,
        currency: request.currency,
        amount: request.amount,
        source: quote.source,
        timestamp: quote.fetched_at,
        buy_rate: quote.buy_rate,
        sell_rate: quote.sell_rate,
        strategy: quote.strategy.clone(),
    }
}
