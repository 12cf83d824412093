//! Per-client request quota keyed on the connecting peer address.
//!
//! Forwarded-for headers are ignored, so a client cannot pick its own key.
//! The quota is a GCRA bucket: `rate_limit_requests` may burst at once and
//! one slot comes back every `window / requests`.

use crate::api::error::ApiError;
use crate::core::config::ServerConfig;
use crate::core::error::{RateError, Result};
use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tracing::{debug, warn};

/// Drops clients whose quota has fully recovered and returns how many were
/// forgotten.
pub type IdleClientSweep = Arc<dyn Fn() -> usize + Send + Sync>;

/// Time for one slot to come back, at least one millisecond.
pub fn replenish_interval(server: &ServerConfig) -> Duration {
    let window = Duration::from_secs(server.rate_limit_window_secs);
    let per_slot = window / server.rate_limit_requests.max(1);
    per_slot.max(Duration::from_millis(1))
}

/// Wraps every route of `router` in the per-peer quota.
pub fn with_client_limit<S>(
    router: Router<S>,
    server: &ServerConfig,
) -> Result<(Router<S>, IdleClientSweep)>
where
    S: Clone + Send + Sync + 'static,
{
    let per_slot = replenish_interval(server);
    let per_slot_ms = u64::try_from(per_slot.as_millis()).unwrap_or(u64::MAX);
    let config = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_millisecond(per_slot_ms)
        .burst_size(server.rate_limit_requests)
        .finish()
        .ok_or_else(|| {
            RateError::Config("rate limit needs at least one request per window".to_string())
        })?;
    let config = Arc::new(config);

    let limiter = config.limiter().clone();
    let sweep: IdleClientSweep = Arc::new(move || {
        let before = limiter.len();
        limiter.retain_recent();
        before.saturating_sub(limiter.len())
    });

    debug!(
        burst = server.rate_limit_requests,
        per_slot_ms, "Client rate limit configured"
    );
    let router = router
        .route_layer(GovernorLayer::new(config))
        .route_layer(middleware::map_response(limit_envelope));
    Ok((router, sweep))
}

/// Seconds the client should wait, read from the limiter's headers.
fn retry_after(headers: &HeaderMap) -> u64 {
    [header::RETRY_AFTER.as_str(), "x-ratelimit-after"]
        .into_iter()
        .find_map(|name| headers.get(name)?.to_str().ok()?.trim().parse::<u64>().ok())
        .unwrap_or(1)
        .max(1)
}

/// Rewrites the limiter's plain-text rejection into the JSON error envelope.
async fn limit_envelope(response: Response) -> Response {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }
    let retry_after = retry_after(response.headers());
    warn!(retry_after, "Client rate limit exceeded");
    ApiError::TooManyRequests { retry_after }.into_response()
}
