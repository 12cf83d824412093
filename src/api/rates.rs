use crate::api::{AppState, Envelope, Meta, envelope};
use crate::service::RatesReport;
use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Rate table for every supported currency.
pub async fn rates(State(state): State<Arc<AppState>>) -> Json<Envelope<RatesReport>> {
    let start = Instant::now();
    let report = state.service.rates().await;
    let cached = report.cached;
    envelope(report, Meta::since(start).cached(cached))
}

#[derive(Debug, Serialize)]
pub struct Cleared {
    pub removed: usize,
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Json<Envelope<Cleared>> {
    let start = Instant::now();
    let removed = state.service.clear_cache().await;
    envelope(Cleared { removed }, Meta::since(start))
}
