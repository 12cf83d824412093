//! HTTP plumbing shared by the scraping strategies.

use crate::core::error::{RateError, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

pub const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
pub const JSON_ACCEPT: &str = "application/json, text/javascript, */*; q=0.01";

/// Hands out browser-like clients, rotating the user agent on each call.
#[derive(Debug)]
pub struct ClientFactory {
    next: AtomicUsize,
    timeout: Duration,
}

impl ClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next: AtomicUsize::new(0),
            timeout,
        }
    }

    pub fn next_user_agent(&self) -> &'static str {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
        USER_AGENTS[index]
    }

    pub fn client(&self, accept: &'static str) -> Result<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-MX,es;q=0.9,en;q=0.8"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        if accept == JSON_ACCEPT {
            headers.insert(
                "X-Requested-With",
                HeaderValue::from_static("XMLHttpRequest"),
            );
        }

        reqwest::Client::builder()
            .user_agent(self.next_user_agent())
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(RateError::from)
    }
}
