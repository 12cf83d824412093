//! HTTP surface: JSON envelopes over the conversion service.

pub mod convert;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod limit;
pub mod meta;
pub mod rates;

use crate::core::config::ServerConfig;
use crate::core::error::Result;
use crate::service::ConversionService;
use axum::{
    Json, Router,
    http::Uri,
    routing::{delete, get, post},
};
use error::ApiError;
use limit::IdleClientSweep;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub struct AppState {
    pub service: Arc<ConversionService>,
}

impl AppState {
    pub fn new(service: Arc<ConversionService>) -> Self {
        Self { service }
    }
}

/// `{success, data, meta}` wrapper used by every successful response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

impl Meta {
    pub fn since(start: Instant) -> Self {
        Self {
            processing_time_ms: elapsed_ms(start.elapsed()),
            cached: None,
            method: None,
        }
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn method(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

pub fn envelope<T: Serialize>(data: T, meta: Meta) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data,
        meta,
    })
}

/// Routes listed by `GET /api/info`.
pub const ENDPOINTS: [&str; 9] = [
    "GET    /api/health",
    "GET    /api/diagnostics",
    "GET    /api/debug/{operation}/{currency}/{amount}",
    "POST   /api/convert",
    "GET    /api/convert/{operation}/{currency}/{amount}",
    "GET    /api/rates",
    "DELETE /api/cache",
    "GET    /api/currencies",
    "GET    /api/info",
];

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_string())
}

/// Builds the router. The returned sweep forgets clients whose quota has
/// recovered.
pub fn app_router(
    state: Arc<AppState>,
    server: &ServerConfig,
) -> Result<(Router, IdleClientSweep)> {
    let api = Router::new()
        .route("/health", get(health::health))
        .route("/diagnostics", get(diagnostics::diagnostics))
        .route("/diagnostico", get(diagnostics::diagnostics))
        .route(
            "/debug/{operation}/{currency}/{amount}",
            get(diagnostics::debug),
        )
        .route("/convert", post(convert::convert_post))
        .route(
            "/convert/{operation}/{currency}/{amount}",
            get(convert::convert_get),
        )
        .route("/rates", get(rates::rates))
        .route("/cache", delete(rates::clear_cache))
        .route("/currencies", get(meta::currencies))
        .route("/info", get(meta::info));
    let (api, sweep) = limit::with_client_limit(api, server)?;

    let router = Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());
    Ok((router, sweep))
}
