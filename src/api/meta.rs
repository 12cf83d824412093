use crate::api::{AppState, ENDPOINTS, Envelope, Meta, envelope};
use crate::core::config::FallbackRate;
use crate::core::rate::{Currency, Operation};
use axum::{Json, extract::State};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Currencies {
    pub supported: Vec<&'static str>,
    pub operations: Vec<&'static str>,
    pub fallback_rates: Option<BTreeMap<Currency, FallbackRate>>,
}

pub async fn currencies(State(state): State<Arc<AppState>>) -> Json<Envelope<Currencies>> {
    let start = Instant::now();
    let data = Currencies {
        supported: Currency::ALL.iter().map(Currency::code).collect(),
        operations: Operation::ACCEPTED_TERMS.to_vec(),
        fallback_rates: state.service.fallback().map(|table| table.rates().clone()),
    };
    envelope(data, Meta::since(start))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub strategies: Vec<&'static str>,
    pub fallback_enabled: bool,
    pub cache_ttl_secs: i64,
    pub endpoints: Vec<&'static str>,
    pub example: &'static str,
}

pub async fn info(State(state): State<Arc<AppState>>) -> Json<Envelope<ServiceInfo>> {
    let start = Instant::now();
    let data = ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Converts foreign currency amounts to MXN at the bank's published rates",
        strategies: state.service.strategy_names(),
        fallback_enabled: state.service.fallback().is_some(),
        cache_ttl_secs: state.service.cache().ttl().num_seconds(),
        endpoints: ENDPOINTS.to_vec(),
        example: "/api/convert/buy/USD/300",
    };
    envelope(data, Meta::since(start))
}
