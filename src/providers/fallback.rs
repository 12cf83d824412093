use crate::core::config::{FallbackConfig, FallbackRate};
use crate::core::rate::{Currency, RateQuote, RateSource};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Last-resort static rates, used when every live strategy failed.
#[derive(Debug, Clone)]
pub struct FallbackTable {
    rates: BTreeMap<Currency, FallbackRate>,
}

impl FallbackTable {
    pub const NAME: &'static str = "fallback";

    pub fn new(rates: BTreeMap<Currency, FallbackRate>) -> Self {
        Self { rates }
    }

    /// The configured table, or `None` when fallback is switched off.
    pub fn from_config(config: &FallbackConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.rates.clone()))
    }

    pub fn rates(&self) -> &BTreeMap<Currency, FallbackRate> {
        &self.rates
    }

    pub fn quote(&self, currency: Currency, now: DateTime<Utc>) -> Option<RateQuote> {
        self.rates.get(&currency).map(|rate| {
            RateQuote::new(
                currency,
                (*rate).into(),
                now,
                RateSource::Fallback,
                Self::NAME,
            )
        })
    }

    /// Currencies whose entry has sell below buy.
    pub fn spread_violations(&self) -> Vec<Currency> {
        self.rates
            .iter()
            .filter(|(_, rate)| rate.sell < rate.buy)
            .map(|(currency, _)| *currency)
            .collect()
    }
}
