//! Headless browser strategy over the W3C WebDriver protocol.
//!
//! A [`BrowserPool`] bounds how many browser sessions exist at once. Each
//! session is owned by a [`SessionGuard`]; [`BrowserPool::with_session`]
//! closes it once the work finishes, and the guard's `Drop` closes it when
//! the work is cancelled or panics. Strategy code never closes sessions
//! itself.

use crate::core::config::BrowserConfig;
use crate::core::error::{RateError, Result};
use crate::core::rate::{Currency, Operation, RatePair};
use crate::providers::chain::RateStrategy;
use crate::providers::extract::strip_tags;
use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Fills the simulator form: operation, currency, amount.
const FILL_FORM_SCRIPT: &str = r#"
const [operation, currency, amount] = arguments;
const fillForm = () => {
  for (const el of document.querySelectorAll('a, button, label, li, span')) {
    const text = (el.textContent || '').trim().toLowerCase();
    if (text.length < 100 && text.includes(operation)) { el.click(); break; }
  }
  for (const select of document.querySelectorAll('select, .custom-select')) {
    select.value = currency;
    select.dispatchEvent(new Event('change', { bubbles: true }));
  }
  const input = document.querySelector('#divisa')
    || document.querySelector('input[placeholder*="antidad"]');
  if (!input) { return false; }
  input.focus();
  input.value = String(amount);
  for (const type of ['input', 'change', 'keyup', 'blur']) {
    input.dispatchEvent(new Event(type, { bubbles: true }));
  }
  return true;
};
return fillForm();
"#;

/// Reads the computed MXN amount, or null while it is not ready.
const READ_RESULT_SCRIPT: &str = r#"
const readResult = () => {
  const field = document.querySelector('#mxn')
    || document.querySelector('input[placeholder*="MXN"], input[placeholder*="mxn"]');
  if (!field || !field.value || field.value === '0') { return null; }
  return field.value;
};
return readResult();
"#;

struct WebDriver {
    base_url: String,
    http: reqwest::Client,
}

impl WebDriver {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| RateError::Browser(format!("Malformed WebDriver reply from {path}: {e}")))?;

        if !status.is_success() {
            let message = payload["value"]["message"]
                .as_str()
                .or_else(|| payload["value"]["error"].as_str())
                .unwrap_or("unknown error");
            return Err(RateError::Browser(format!(
                "{path} failed with HTTP {}: {message}",
                status.as_u16()
            )));
        }
        Ok(payload.get("value").cloned().unwrap_or(Value::Null))
    }
}

/// Cheap handle to a live browser session.
#[derive(Clone)]
pub struct Session {
    driver: Arc<WebDriver>,
    id: Arc<str>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.driver
            .command(
                Method::POST,
                &format!("/session/{}/url", self.id),
                Some(json!({ "url": url })),
            )
            .await
            .map(|_| ())
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.driver
            .command(
                Method::POST,
                &format!("/session/{}/execute/sync", self.id),
                Some(json!({ "script": script, "args": args })),
            )
            .await
    }

    async fn delete(&self) -> Result<()> {
        self.driver
            .command(Method::DELETE, &format!("/session/{}", self.id), None)
            .await
            .map(|_| ())
    }
}

/// Owns one browser session and its pool slot until closed or dropped.
pub struct SessionGuard {
    session: Option<Session>,
    permit: Option<OwnedSemaphorePermit>,
}

impl SessionGuard {
    pub fn session(&self) -> Option<Session> {
        self.session.clone()
    }

    pub async fn close(mut self) {
        let permit = self.permit.take();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.delete().await {
                warn!(session = session.id(), error = %e, "Failed to close browser session");
            } else {
                debug!(session = session.id(), "Closed browser session");
            }
        }
        drop(permit);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session = session.id(), "Closing abandoned browser session");
                handle.spawn(async move {
                    if let Err(e) = session.delete().await {
                        warn!(session = session.id(), error = %e, "Failed to close browser session");
                    }
                    drop(permit);
                });
            }
            Err(_) => warn!(
                session = session.id(),
                "No runtime available, browser session left open"
            ),
        }
    }
}

pub struct BrowserPool {
    driver: Arc<WebDriver>,
    permits: Arc<Semaphore>,
    size: usize,
    headless: bool,
}

impl BrowserPool {
    pub fn new(webdriver_url: &str, size: usize, headless: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(RateError::from)?;
        Ok(Self {
            driver: Arc::new(WebDriver {
                base_url: webdriver_url.to_string(),
                http,
            }),
            permits: Arc::new(Semaphore::new(size)),
            size,
            headless,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--disable-gpu",
            "--window-size=1200,800",
        ];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }

    /// Waits for a free slot and opens a new session in it.
    ///
    /// Session creation runs in its own task that always hands the new
    /// session to a guard, so a caller cancelled mid-request still gets the
    /// session closed.
    pub async fn acquire(&self) -> Result<SessionGuard> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RateError::Browser("browser pool closed".to_string()))?;

        let driver = Arc::clone(&self.driver);
        let capabilities = self.capabilities();
        let opening = tokio::spawn(async move {
            let created = driver
                .command(Method::POST, "/session", Some(capabilities))
                .await?;
            let id = created["sessionId"]
                .as_str()
                .ok_or_else(|| RateError::Browser("WebDriver returned no sessionId".to_string()))?;
            debug!(session = id, "Opened browser session");

            Ok::<_, RateError>(SessionGuard {
                session: Some(Session {
                    id: Arc::from(id),
                    driver,
                }),
                permit: Some(permit),
            })
        });
        opening
            .await
            .map_err(|e| RateError::Browser(format!("session setup task failed: {e}")))?
    }

    /// Runs `work` against a pooled session, closing it on every exit path.
    pub async fn with_session<T, F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire().await?;
        let session = guard
            .session()
            .ok_or_else(|| RateError::Browser("session already closed".to_string()))?;
        let result = work(session).await;
        guard.close().await;
        result
    }
}

/// Drives the bank's conversion simulator in a real browser.
pub struct BrowserStrategy {
    pool: Arc<BrowserPool>,
    page_url: String,
    reference_amount: Decimal,
    navigation_timeout: Duration,
    calculation_timeout: Duration,
    poll_interval: Duration,
}

impl BrowserStrategy {
    pub const NAME: &'static str = "browser";

    pub fn new(pool: Arc<BrowserPool>, config: &BrowserConfig) -> Self {
        Self {
            pool,
            page_url: config.page_url.clone(),
            reference_amount: config.reference_amount,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            calculation_timeout: Duration::from_secs(config.calculation_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn from_config(config: &BrowserConfig) -> Result<Option<Self>> {
        let Some(url) = config.webdriver_url.as_deref() else {
            return Ok(None);
        };
        let pool = BrowserPool::new(url, config.pool_size, config.headless)?;
        Ok(Some(Self::new(Arc::new(pool), config)))
    }
}

struct Simulation {
    reference_amount: Decimal,
    calculation_timeout: Duration,
    poll_interval: Duration,
}

impl Simulation {
    async fn rate(&self, session: &Session, currency: Currency, operation: Operation) -> Result<Decimal> {
        let term = match operation {
            Operation::Buy => "comprar",
            Operation::Sell => "vender",
        };
        let filled = session
            .execute(
                FILL_FORM_SCRIPT,
                vec![
                    json!(term),
                    json!(currency.code()),
                    json!(self.reference_amount.to_string()),
                ],
            )
            .await?;
        if filled == Value::Bool(false) {
            return Err(RateError::Browser("amount field not found".to_string()));
        }

        let deadline = Instant::now() + self.calculation_timeout;
        loop {
            let value = session.execute(READ_RESULT_SCRIPT, vec![]).await?;
            if let Some(mxn) = value.as_str().and_then(parse_mxn) {
                if mxn > Decimal::ZERO {
                    return Ok((mxn / self.reference_amount).round_dp(4));
                }
            }
            if Instant::now() >= deadline {
                return Err(RateError::Browser(format!(
                    "no {operation} result for {currency} within {:?}",
                    self.calculation_timeout
                )));
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn parse_mxn(raw: &str) -> Option<Decimal> {
    let cleaned: String = strip_tags(raw)
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

#[async_trait]
impl RateStrategy for BrowserStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    #[instrument(name = "BrowserSimulation", skip(self), fields(currency = %currency))]
    async fn fetch(&self, currency: Currency) -> Result<RatePair> {
        let page_url = self.page_url.clone();
        let navigation_timeout = self.navigation_timeout;
        let simulation = Simulation {
            reference_amount: self.reference_amount,
            calculation_timeout: self.calculation_timeout,
            poll_interval: self.poll_interval,
        };

        let pair = self
            .pool
            .with_session(|session| async move {
                timeout(navigation_timeout, session.navigate(&page_url))
                    .await
                    .map_err(|_| RateError::Timeout {
                        strategy: format!("{} navigation", Self::NAME),
                    })??;

                let buy = simulation.rate(&session, currency, Operation::Buy).await?;
                let sell = simulation.rate(&session, currency, Operation::Sell).await?;
                Ok(RatePair::new(buy, sell))
            })
            .await?;

        info!(buy = %pair.buy, sell = %pair.sell, "Simulated rates in browser");
        Ok(pair)
    }
}
