use crate::api::{AppState, Envelope, Meta, envelope};
use crate::service::HealthReport;
use axum::{Json, extract::State};
use std::sync::Arc;
use std::time::Instant;

/// Upstream reachability, cache size and fallback availability. Always 200;
/// an unreachable bank page shows up as `DEGRADED`.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Envelope<HealthReport>> {
    let start = Instant::now();
    let report = state.service.health().await;
    envelope(report, Meta::since(start))
}
