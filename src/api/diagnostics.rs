use crate::api::error::ApiResult;
use crate::api::{AppState, Envelope, Meta, envelope};
use crate::core::convert::ConversionRequest;
use crate::service::{DebugReport, DiagnosticsReport};
use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use std::time::Instant;

/// Probes every configured page and endpoint. Always 200.
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> Json<Envelope<DiagnosticsReport>> {
    let start = Instant::now();
    let report = state.service.diagnostics().await;
    envelope(report, Meta::since(start))
}

/// Conversion plus diagnostics and the rate table. A failed conversion is
/// part of the report, so only bad input is an error.
pub async fn debug(
    State(state): State<Arc<AppState>>,
    Path((operation, currency, amount)): Path<(String, String, String)>,
) -> ApiResult<Json<Envelope<DebugReport>>> {
    let start = Instant::now();
    let request = ConversionRequest::parse(&operation, &currency, &amount)?;
    let report = state.service.debug(&request).await;
    Ok(envelope(report, Meta::since(start).method("GET")))
}
