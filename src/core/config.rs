use crate::core::rate::{Currency, RatePair};
use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::{fs, path::PathBuf};
use tracing::debug;

/// Longest accepted cache TTL: 30 days.
pub const MAX_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted sweep interval: one day.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Rate acquisition strategies, tried in the configured order.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    PageScrape,
    EndpointProbe,
    Browser,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            rate_limit_requests: 15,
            rate_limit_window_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub cache_fallback: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl_secs: 300,
            sweep_interval_secs: 300,
            cache_fallback: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScrapeConfig {
    pub page_urls: Vec<String>,
    pub endpoint_urls: Vec<String>,
    pub request_timeout_secs: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub min_content_length: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            page_urls: vec![
                "https://www.banregio.com/divisas.php".to_string(),
                "https://divisas.banregio.com/".to_string(),
                "https://www.banregio.com/divisas".to_string(),
            ],
            endpoint_urls: vec![
                "https://www.banregio.com/api/divisas".to_string(),
                "https://www.banregio.com/ajax/exchange-rates".to_string(),
                "https://divisas.banregio.com/api/rates".to_string(),
                "https://www.banregio.com/services/currency-exchange".to_string(),
            ],
            request_timeout_secs: 15,
            retries: 1,
            retry_delay_ms: 500,
            min_content_length: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BrowserConfig {
    /// WebDriver server (e.g. chromedriver). The browser strategy is
    /// skipped when unset.
    pub webdriver_url: Option<String>,
    pub page_url: String,
    pub pool_size: usize,
    pub reference_amount: Decimal,
    pub navigation_timeout_secs: u64,
    pub calculation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            webdriver_url: None,
            page_url: "https://www.banregio.com/divisas.php#!".to_string(),
            pool_size: 3,
            reference_amount: Decimal::new(1000, 0),
            navigation_timeout_secs: 60,
            calculation_timeout_secs: 20,
            poll_interval_ms: 500,
            headless: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct FallbackRate {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl From<FallbackRate> for RatePair {
    fn from(rate: FallbackRate) -> Self {
        RatePair::new(rate.buy, rate.sell)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub rates: BTreeMap<Currency, FallbackRate>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        let rate = |buy: i64, sell: i64, scale: u32| FallbackRate {
            buy: Decimal::new(buy, scale),
            sell: Decimal::new(sell, scale),
        };
        FallbackConfig {
            enabled: true,
            rates: BTreeMap::from([
                (Currency::Usd, rate(1780, 1930, 2)),
                (Currency::Eur, rate(2020, 2180, 2)),
                (Currency::Cad, rate(1310, 1420, 2)),
                (Currency::Gbp, rate(2250, 2430, 2)),
                (Currency::Jpy, rate(120, 140, 3)),
            ]),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: 2,
            base_delay_ms: 1000,
        }
    }
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::PageScrape,
        StrategyKind::EndpointProbe,
        StrategyKind::Browser,
    ]
}

fn default_strategy_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,
    #[serde(default = "default_strategy_timeout_secs")]
    pub strategy_timeout_secs: u64,
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            strategies: default_strategies(),
            strategy_timeout_secs: default_strategy_timeout_secs(),
            scrape: ScrapeConfig::default(),
            browser: BrowserConfig::default(),
            fallback: FallbackConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config from the default location, or built-in defaults
    /// when no file exists there.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!(path = %config_path.display(), "No config file, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides()?;
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("mx", "divisa", "divisa")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config = Self::from_yaml(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.apply_env_overrides()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("DIVISA_LISTEN_ADDR") {
            self.server.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid DIVISA_LISTEN_ADDR: {addr}"))?;
        } else if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port
                .parse()
                .with_context(|| format!("Invalid PORT: {port}"))?;
            self.server.listen_addr.set_port(port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 || self.cache.ttl_secs > MAX_TTL_SECS {
            bail!("cache.ttl_secs must be between 1 and {MAX_TTL_SECS}");
        }
        if self.cache.sweep_interval_secs == 0
            || self.cache.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS
        {
            bail!("cache.sweep_interval_secs must be between 1 and {MAX_SWEEP_INTERVAL_SECS}");
        }
        if self.strategies.is_empty() && !self.fallback.enabled {
            bail!("at least one strategy is required when fallback is disabled");
        }
        if self.server.rate_limit_requests == 0 || self.server.rate_limit_window_secs == 0 {
            bail!("server rate limit requests and window must be greater than 0");
        }
        if self.browser.pool_size == 0 {
            bail!("browser.pool_size must be greater than 0");
        }
        if self.browser.reference_amount <= Decimal::ZERO {
            bail!("browser.reference_amount must be positive");
        }
        for (currency, rate) in &self.fallback.rates {
            if rate.buy <= Decimal::ZERO || rate.sell <= Decimal::ZERO {
                bail!("fallback rate for {currency} must be positive");
            }
            if rate.sell < rate.buy {
                bail!(
                    "fallback rate for {currency} has sell ({}) below buy ({})",
                    rate.sell,
                    rate.buy
                );
            }
        }
        Ok(())
    }
}
