use crate::api::error::{ApiError, ApiResult};
use crate::api::{AppState, Envelope, Meta, envelope};
use crate::core::convert::{Conversion, ConversionRequest};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

/// Amount as sent by clients: a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(f64),
    Text(String),
}

impl AmountInput {
    fn as_text(&self) -> String {
        match self {
            AmountInput::Number(n) => n.to_string(),
            AmountInput::Text(s) => s.clone(),
        }
    }
}

/// POST body. Missing fields default to a 300 USD purchase; the Spanish
/// field names older clients send are accepted as aliases.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConvertBody {
    #[serde(alias = "tipo")]
    pub operation: Option<String>,
    #[serde(alias = "moneda")]
    pub currency: Option<String>,
    #[serde(alias = "cantidad")]
    pub amount: Option<AmountInput>,
}

impl ConvertBody {
    pub fn into_request(self) -> ApiResult<ConversionRequest> {
        let operation = self.operation.unwrap_or_else(|| "buy".to_string());
        let currency = self.currency.unwrap_or_else(|| "USD".to_string());
        let amount = self
            .amount
            .map_or_else(|| "300".to_string(), |a| a.as_text());
        Ok(ConversionRequest::parse(&operation, &currency, &amount)?)
    }
}

pub async fn convert_get(
    State(state): State<Arc<AppState>>,
    Path((operation, currency, amount)): Path<(String, String, String)>,
) -> ApiResult<Json<Envelope<Conversion>>> {
    let start = Instant::now();
    let request = ConversionRequest::parse(&operation, &currency, &amount)?;
    let lookup = state.service.convert(&request).await?;
    Ok(envelope(
        lookup.value,
        Meta::since(start).cached(lookup.cached).method("GET"),
    ))
}

pub async fn convert_post(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ConvertBody>, JsonRejection>,
) -> ApiResult<Json<Envelope<Conversion>>> {
    let start = Instant::now();
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let request = body.into_request()?;
    let lookup = state.service.convert(&request).await?;
    Ok(envelope(
        lookup.value,
        Meta::since(start).cached(lookup.cached).method("POST"),
    ))
}
