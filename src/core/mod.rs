//! Core business logic abstractions

pub mod cache;
pub mod clock;
pub mod config;
pub mod convert;
pub mod error;
pub mod log;
pub mod rate;

// Re-export main types for cleaner imports
pub use cache::RateCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use convert::{Conversion, ConversionRequest, convert};
pub use error::RateError;
pub use rate::{Currency, Operation, RatePair, RateProvider, RateQuote, RateSource};
