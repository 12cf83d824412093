//! Error taxonomy for rate acquisition and conversion.

use thiserror::Error;

/// Errors raised while validating a request or obtaining a rate.
///
/// Variants map onto three classes: bad input (`Validation`), a failing
/// upstream that may recover on retry (`UpstreamUnavailable`, `Timeout`,
/// `Browser`, `Http`), and terminal unavailability (`RateUnavailable`).
#[derive(Error, Debug)]
pub enum RateError {
    #[error("{0}")]
    Validation(String),

    #[error("Upstream unavailable ({strategy}): {message}")]
    UpstreamUnavailable { strategy: String, message: String },

    #[error("Timed out waiting for strategy: {strategy}")]
    Timeout { strategy: String },

    #[error("Browser session error: {0}")]
    Browser(String),

    #[error("No rate available for {currency}: {reason}")]
    RateUnavailable { currency: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RateError {
    pub fn upstream(strategy: &str, message: impl Into<String>) -> Self {
        RateError::UpstreamUnavailable {
            strategy: strategy.to_string(),
            message: message.into(),
        }
    }

    /// Whether repeating the lookup could produce a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateError::UpstreamUnavailable { .. }
                | RateError::Timeout { .. }
                | RateError::Browser(_)
                | RateError::Http(_)
        )
    }
}

pub type Result<T, E = RateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(!RateError::Validation("bad".into()).is_retryable());
        assert!(
            !RateError::RateUnavailable {
                currency: "USD".into(),
                reason: "none".into()
            }
            .is_retryable()
        );
        assert!(RateError::upstream("page_scrape", "blocked").is_retryable());
        assert!(
            RateError::Timeout {
                strategy: "browser".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_messages() {
        let err = RateError::upstream("endpoint_probe", "HTTP 403");
        assert_eq!(
            err.to_string(),
            "Upstream unavailable (endpoint_probe): HTTP 403"
        );
    }
}
