pub mod browser;
pub mod caching;
pub mod chain;
pub mod endpoint_probe;
pub mod extract;
pub mod fallback;
pub mod http;
pub mod page_scrape;
pub mod util;

pub use caching::CachingRateProvider;
pub use chain::{RateStrategy, StrategyChain};
pub use fallback::FallbackTable;
